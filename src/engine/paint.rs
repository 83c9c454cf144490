use std::{collections::HashMap, io::Cursor, sync::Arc};

use fontdb::ID;
use image::{RgbImage, RgbaImage, codecs::jpeg::JpegEncoder};
use tiny_skia::{
    ColorU8, FillRule, FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Transform,
};
use tracing::warn;

use super::{
    EngineError,
    fonts::{FaceData, FontLibrary, outline_glyph},
    job::ImageFormat,
    layout::{Bounds, DisplayItem, Page},
};

const MAX_CANVAS_SIDE: u32 = 16_384;

/// Paint `page` onto an opaque white canvas, `scale` device pixels per CSS
/// pixel.
pub fn paint(page: &Page, scale: f32, library: &FontLibrary) -> Result<Pixmap, EngineError> {
    let width = device_side(page.width, scale);
    let height = device_side(page.height, scale);
    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| EngineError::Canvas(format!("cannot allocate {width}x{height} canvas")))?;
    pixmap.fill(tiny_skia::Color::WHITE);

    let transform = Transform::from_scale(scale, scale);
    let face_data = load_faces(page, library);
    let faces: HashMap<ID, ttf_parser::Face<'_>> = face_data
        .iter()
        .filter_map(|(id, data)| data.face().map(|face| (*id, face)))
        .collect();

    for item in &page.items {
        match item {
            DisplayItem::Rect { bounds, color } => fill_rect(&mut pixmap, bounds, *color, transform),
            DisplayItem::Text {
                x,
                baseline,
                size,
                color,
                glyphs,
            } => {
                let mut builder = PathBuilder::new();
                let mut pen = *x;
                for glyph in glyphs {
                    if glyph.ink {
                        let outlined = glyph
                            .face
                            .and_then(|id| faces.get(&id))
                            .is_some_and(|face| {
                                outline_glyph(face, glyph.glyph, *size, pen, *baseline, &mut builder)
                            });
                        if !outlined && glyph.face.is_none() {
                            let bar = Bounds {
                                x: pen + glyph.advance * 0.1,
                                y: baseline - size * 0.6,
                                width: glyph.advance * 0.8,
                                height: size * 0.6,
                            };
                            fill_rect(&mut pixmap, &bar, *color, transform);
                        }
                    }
                    pen += glyph.advance;
                }
                if let Some(path) = builder.finish() {
                    let paint = solid(*color);
                    pixmap.fill_path(&path, &paint, FillRule::Winding, transform, None);
                }
            }
            DisplayItem::Image { bounds, image } => draw_image(&mut pixmap, bounds, image, transform),
        }
    }

    Ok(pixmap)
}

fn device_side(css: f32, scale: f32) -> u32 {
    let side = (css * scale).ceil().max(1.0) as u32;
    if side > MAX_CANVAS_SIDE {
        warn!(
            target = "engine::paint",
            op = "paint::canvas",
            result = "clamped",
            requested = side,
            limit = MAX_CANVAS_SIDE,
            "Canvas side clamped"
        );
        MAX_CANVAS_SIDE
    } else {
        side
    }
}

fn load_faces(page: &Page, library: &FontLibrary) -> HashMap<ID, Arc<FaceData>> {
    let mut faces = HashMap::new();
    for item in &page.items {
        if let DisplayItem::Text { glyphs, .. } = item {
            for id in glyphs.iter().filter_map(|glyph| glyph.face) {
                if !faces.contains_key(&id)
                    && let Some(data) = library.face_data(id)
                {
                    faces.insert(id, data);
                }
            }
        }
    }
    faces
}

fn solid(color: ColorU8) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.red(), color.green(), color.blue(), color.alpha());
    paint.anti_alias = true;
    paint
}

fn fill_rect(pixmap: &mut Pixmap, bounds: &Bounds, color: ColorU8, transform: Transform) {
    if let Some(rect) = Rect::from_xywh(bounds.x, bounds.y, bounds.width, bounds.height) {
        pixmap.fill_rect(rect, &solid(color), transform, None);
    }
}

fn draw_image(pixmap: &mut Pixmap, bounds: &Bounds, image: &RgbaImage, transform: Transform) {
    let Some(mut source) = Pixmap::new(image.width(), image.height()) else {
        return;
    };
    for (target, pixel) in source.pixels_mut().iter_mut().zip(image.pixels()) {
        let [r, g, b, a] = pixel.0;
        *target = ColorU8::from_rgba(r, g, b, a).premultiply();
    }

    let sx = bounds.width / image.width() as f32;
    let sy = bounds.height / image.height() as f32;
    let placement = transform.pre_concat(Transform::from_row(sx, 0.0, 0.0, sy, bounds.x, bounds.y));
    pixmap.draw_pixmap(
        0,
        0,
        source.as_ref(),
        &PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        },
        placement,
        None,
    );
}

pub fn encode(pixmap: &Pixmap, format: ImageFormat) -> Result<Vec<u8>, EngineError> {
    match format {
        ImageFormat::Png => pixmap
            .encode_png()
            .map_err(|err| EngineError::Encode(format!("png: {err}"))),
        ImageFormat::Jpeg { quality } => {
            // The canvas is opaque, so premultiplied and straight RGB agree.
            let rgb: Vec<u8> = pixmap
                .data()
                .chunks_exact(4)
                .flat_map(|pixel| [pixel[0], pixel[1], pixel[2]])
                .collect();
            let image = RgbImage::from_raw(pixmap.width(), pixmap.height(), rgb)
                .ok_or_else(|| EngineError::Encode("jpeg: pixel buffer size mismatch".into()))?;

            let mut buffer = Vec::new();
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buffer), quality.clamp(1, 100));
            image
                .write_with_encoder(encoder)
                .map_err(|err| EngineError::Encode(format!("jpeg: {err}")))?;
            Ok(buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fontdb::Database;

    fn blank_page() -> Page {
        Page {
            width: 20.0,
            height: 10.0,
            items: vec![DisplayItem::Rect {
                bounds: Bounds {
                    x: 0.0,
                    y: 0.0,
                    width: 10.0,
                    height: 10.0,
                },
                color: ColorU8::from_rgba(255, 0, 0, 255),
            }],
        }
    }

    #[test]
    fn canvas_is_scaled_and_painted() {
        let library = FontLibrary::new(Database::new());
        let pixmap = paint(&blank_page(), 2.0, &library).expect("paint");
        assert_eq!((pixmap.width(), pixmap.height()), (40, 20));

        let left = pixmap.pixel(5, 5).expect("pixel");
        let right = pixmap.pixel(35, 5).expect("pixel");
        assert_eq!((left.red(), left.green()), (255, 0));
        assert_eq!((right.red(), right.green(), right.blue()), (255, 255, 255));
    }

    #[test]
    fn encodes_png_and_jpeg_signatures() {
        let library = FontLibrary::new(Database::new());
        let pixmap = paint(&blank_page(), 1.0, &library).expect("paint");

        let png = encode(&pixmap, ImageFormat::Png).expect("png");
        assert_eq!(&png[..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);

        let jpeg = encode(&pixmap, ImageFormat::jpeg(80)).expect("jpeg");
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
