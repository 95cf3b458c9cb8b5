use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use podsnap::rendering::paint::build_display_list;
use podsnap::rendering::Rasterizer;
use podsnap::{Document, Viewport};

const WIDGET: &str = r##"<html><body>
<div id="export-target" style="width: 240px; height: 160px; padding: 8px; background: linear-gradient(135deg, #f5f5f7, #d4d6d8); color: #1b1b1f; font-size: 14px">
  <div style="background-color: #d03a2f; color: #ffffff; padding: 4px">Have A Destination?</div>
  <div style="border: 2px solid #2f6bd0; height: 40px; opacity: 0.5">Mac Miller - Balloonerism</div>
</div>
</body></html>"##;

fn golden_path(name: &str) -> PathBuf {
    let mut p = PathBuf::from("tests/goldens/expected");
    p.push(name);
    p
}

fn render(rasterizer: Rasterizer) -> Vec<u8> {
    let doc = Document::parse(WIDGET, Viewport::default());
    let target = doc.query_selector("#export-target").expect("fixture target");
    let list = build_display_list(&doc, target, None).expect("display list");
    rasterizer.render(&list, 2.0).expect("render").png_data
}

fn check_golden(name: &str, png: &[u8]) {
    let digest = hex::encode(Sha256::digest(png));
    let expected_path = golden_path(name);
    if std::env::var("UPDATE_GOLDENS").is_ok() {
        fs::create_dir_all("tests/goldens/expected").ok();
        fs::write(&expected_path, &digest).expect("write golden");
        println!("Updated golden: {:?}", expected_path);
        return;
    }

    if !expected_path.exists() {
        println!(
            "No golden at {:?}; run with UPDATE_GOLDENS=1 to create it. Skipping.",
            expected_path
        );
        return;
    }

    let expected = fs::read_to_string(&expected_path).expect("unable to read golden");
    assert_eq!(digest, expected.trim(), "{} drifted from its golden", name);
}

#[test]
fn direct_raster_matches_golden() {
    let png = render(Rasterizer::Direct);
    assert_eq!(png, render(Rasterizer::Direct));
    check_golden("widget-direct.sha256", &png);
}

#[test]
fn svg_raster_matches_golden() {
    let png = render(Rasterizer::Svg);
    assert_eq!(png, render(Rasterizer::Svg));
    check_golden("widget-svg.sha256", &png);
}

#[test]
fn both_rasterizers_agree_on_size() {
    let direct = image::load_from_memory(&render(Rasterizer::Direct)).unwrap();
    let svg = image::load_from_memory(&render(Rasterizer::Svg)).unwrap();
    assert_eq!((direct.width(), direct.height()), (480, 320));
    assert_eq!((svg.width(), svg.height()), (480, 320));
}
