use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};
use qiepian::model::{DetectItem, DetectResult, FnModel};
use qiepian::{BoxGeometry, CvManager, Record, TilingConfig, TilingDetector};

const WHITE: [u8; 3] = [255, 255, 255];
const RED: [u8; 3] = [255, 0, 0];

/// 按颜色找出纯白（类别 1）和纯红（类别 2）区域，分数随面积增大
fn color_regions(image: &RgbImage) -> Result<DetectResult, String> {
  let mut items = Vec::new();
  for (class_id, color) in [(1, WHITE), (2, RED)] {
    let mut bounds: Option<[u32; 4]> = None;
    for (x, y, pixel) in image.enumerate_pixels() {
      if pixel.0 == color {
        let b = bounds.get_or_insert([x, y, x, y]);
        b[0] = b[0].min(x);
        b[1] = b[1].min(y);
        b[2] = b[2].max(x);
        b[3] = b[3].max(y);
      }
    }
    if let Some([x0, y0, x1, y1]) = bounds {
      let area = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;
      items.push(DetectItem {
        class_id,
        score: area / (area + 100.0),
        bbox: BoxGeometry::corners(x0 as f32, y0 as f32, (x1 + 1) as f32, (y1 + 1) as f32),
      });
    }
  }
  Ok(DetectResult::from(items))
}

fn paint(image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
  for py in y..y + h {
    for px in x..x + w {
      image.put_pixel(px, py, Rgb(color));
    }
  }
}

/// 1000x600 画面: 白色方块跨越切片边界，红色方块在右下角切片内
fn scene_png() -> Vec<u8> {
  let mut image = RgbImage::new(1000, 600);
  paint(&mut image, 300, 100, 40, 40, WHITE);
  paint(&mut image, 800, 450, 30, 30, RED);
  let mut bytes = Vec::new();
  image
    .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
    .unwrap();
  bytes
}

fn manager(config: TilingConfig) -> CvManager<FnModel<fn(&RgbImage) -> Result<DetectResult, String>, RgbImage>> {
  CvManager::new(
    FnModel::new(color_regions as fn(&RgbImage) -> Result<DetectResult, String>),
    TilingDetector::new(config).unwrap(),
  )
}

fn small_slices() -> TilingConfig {
  TilingConfig::default().with_slice_size(400, 400)
}

#[test]
fn test_sliced_detection_fuses_boundary_duplicates() {
  let records = manager(small_slices()).detect_objects(&scene_png());
  assert_eq!(
    records,
    vec![
      Record {
        bbox: [300, 100, 40, 40],
        category_id: 1,
      },
      Record {
        bbox: [800, 450, 30, 30],
        category_id: 2,
      },
    ]
  );
  assert!(records.iter().all(Record::is_well_formed));
}

#[test]
fn test_whole_image_detection_matches_sliced() {
  let png = scene_png();
  let sliced = manager(small_slices()).detect_objects(&png);
  let whole = manager(small_slices().with_slicing(false)).detect_objects(&png);
  assert_eq!(sliced, whole);
}

#[test]
fn test_sequential_matches_parallel() {
  let png = scene_png();
  let parallel = manager(small_slices()).detect_objects(&png);
  let sequential = manager(small_slices().with_parallel(false)).detect_objects(&png);
  assert_eq!(parallel, sequential);
}

#[test]
fn test_confidence_threshold_drops_small_regions() {
  // 红色方块分数 0.9，白色方块分数约 0.94
  let records = manager(small_slices().with_confidence_threshold(0.92)).detect_objects(&scene_png());
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].category_id, 1);
}

#[test]
fn test_failures_return_empty() {
  let unavailable: CvManager<FnModel<fn(&RgbImage) -> Result<DetectResult, String>, RgbImage>> =
    CvManager::unavailable("模型文件缺失", TilingDetector::default());
  assert!(!unavailable.is_available());
  assert!(unavailable.detect_objects(&scene_png()).is_empty());

  assert!(manager(small_slices()).detect_objects(b"garbage").is_empty());
}
