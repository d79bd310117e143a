//! PNG export of the latest annotated frame.

use crate::pipeline::{AnnotatedFrame, Overlay, OverlayKind};
use image::{Rgb, RgbImage};
use std::path::Path;
use thiserror::Error;

const KNOWN_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([220, 0, 0]);
const OUTLINE_PX: u32 = 2;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("no frame has been published yet")]
    NoFrame,
    #[error("snapshot path must end in .png: {0}")]
    NotPng(String),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}

/// Grayscale frame expanded to RGB with a coloured outline per overlay.
pub fn render(annotated: &AnnotatedFrame) -> RgbImage {
    let frame = &annotated.frame;
    let mut img = RgbImage::from_fn(frame.width, frame.height, |x, y| {
        let v = frame.data[(y * frame.width + x) as usize];
        Rgb([v, v, v])
    });
    for overlay in &annotated.overlays {
        draw_outline(&mut img, overlay);
    }
    img
}

pub fn save_png(annotated: &AnnotatedFrame, path: &Path) -> Result<(), SnapshotError> {
    let is_png = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if !is_png {
        return Err(SnapshotError::NotPng(path.display().to_string()));
    }
    render(annotated).save_with_format(path, image::ImageFormat::Png)?;
    Ok(())
}

fn draw_outline(img: &mut RgbImage, overlay: &Overlay) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let color = match overlay.kind {
        OverlayKind::Known => KNOWN_COLOR,
        OverlayKind::Unknown => UNKNOWN_COLOR,
    };
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let b = &overlay.bbox;
    let (x0, x1) = (clamp_x(b.x), clamp_x(b.x + b.width));
    let (y0, y1) = (clamp_y(b.y), clamp_y(b.y + b.height));

    for y in y0..=y1 {
        for x in x0..=x1 {
            let on_edge = x < x0 + OUTLINE_PX
                || x + OUTLINE_PX > x1
                || y < y0 + OUTLINE_PX
                || y + OUTLINE_PX > y1;
            if on_edge {
                img.put_pixel(x, y, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::frame;
    use rollcall_core::BoundingBox;

    fn annotated(kind: OverlayKind) -> AnnotatedFrame {
        let mut frame = frame(0, 0);
        frame.data = vec![50; 16];
        AnnotatedFrame {
            frame,
            overlays: vec![Overlay {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 10.0, // clipped to the 4x4 frame
                    height: 3.0,
                    confidence: 1.0,
                    landmarks: None,
                },
                label: "ANA".into(),
                kind,
            }],
            detected: true,
        }
    }

    #[test]
    fn test_render_draws_clipped_outline() {
        let img = render(&annotated(OverlayKind::Known));
        assert_eq!(img.dimensions(), (4, 4));
        assert_eq!(*img.get_pixel(0, 0), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(3, 3), KNOWN_COLOR);
        assert_eq!(*img.get_pixel(0, 3), KNOWN_COLOR);
    }

    #[test]
    fn test_render_without_overlays_is_gray() {
        let mut a = annotated(OverlayKind::Unknown);
        a.overlays.clear();
        let img = render(&a);
        assert!(img.pixels().all(|p| *p == Rgb([50, 50, 50])));
    }

    #[test]
    fn test_save_png_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.png");
        save_png(&annotated(OverlayKind::Unknown), &path).unwrap();
        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*loaded.get_pixel(1, 0), UNKNOWN_COLOR);
    }

    #[test]
    fn test_save_rejects_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_png(&annotated(OverlayKind::Known), &dir.path().join("snap.jpg")).unwrap_err();
        assert!(matches!(err, SnapshotError::NotPng(_)));
    }
}
