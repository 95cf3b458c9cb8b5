use criterion::{black_box, criterion_group, criterion_main, Criterion};

use podsnap::export::blank::{analyze_capture, BlankThresholds};
use podsnap::rendering::paint::build_display_list;
use podsnap::rendering::raster::encode_png;
use podsnap::rendering::Rasterizer;
use podsnap::{Document, Viewport};

const WIDGET: &str = r##"<div id="t" style="width: 300px; height: 200px; padding: 12px; background: linear-gradient(90deg, #d03a2f, #2f6bd0); color: #fff">
  <div style="background-color: #1b1b1f; padding: 6px">Have A Destination? Mac Miller</div>
</div>"##;

fn bench_blank_heuristic(c: &mut Criterion) {
    let solid = encode_png(&image::RgbaImage::from_pixel(1200, 800, image::Rgba([208, 58, 47, 255]))).unwrap();

    let doc = Document::parse(WIDGET, Viewport::default());
    let target = doc.query_selector("#t").expect("bench target");
    let list = build_display_list(&doc, target, None).expect("display list");
    let widget = Rasterizer::Direct.render(&list, 4.0).expect("render").png_data;

    let thresholds = BlankThresholds::default();
    c.bench_function("blank_solid_1200x800", |b| {
        b.iter(|| analyze_capture(black_box(&solid), &thresholds).unwrap())
    });
    c.bench_function("blank_widget_1200x800", |b| {
        b.iter(|| analyze_capture(black_box(&widget), &thresholds).unwrap())
    });
}

fn bench_rasterizers(c: &mut Criterion) {
    let doc = Document::parse(WIDGET, Viewport::default());
    let target = doc.query_selector("#t").expect("bench target");
    let list = build_display_list(&doc, target, None).expect("display list");

    c.bench_function("raster_direct_x2", |b| {
        b.iter(|| Rasterizer::Direct.render(black_box(&list), 2.0).unwrap())
    });
    c.bench_function("raster_svg_x2", |b| b.iter(|| Rasterizer::Svg.render(black_box(&list), 2.0).unwrap()));
}

criterion_group!(benches, bench_blank_heuristic, bench_rasterizers);
criterion_main!(benches);
