//! Document normalization: turn an uploaded identity document into a single
//! decoded raster image representing page 1.
//!
//! PDF rasterization goes through pdfium, which is not async-safe; callers
//! in async contexts must rasterize inside `spawn_blocking`.

use image::DynamicImage;
use pdfium_render::prelude::*;
use thiserror::Error;

/// Media type of a PDF document upload.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),
    #[error("pdfium unavailable: {0}")]
    PdfBackend(String),
    #[error("could not open document: {0}")]
    PdfDecode(String),
    #[error("document has no pages")]
    EmptyDocument,
    #[error("page render failed: {0}")]
    PdfRender(String),
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// True when `media_type` is acceptable for the identity document part.
pub fn is_supported_document_type(media_type: &str) -> bool {
    media_type == PDF_MEDIA_TYPE || media_type.starts_with("image/")
}

/// True when `media_type` is acceptable for the comparison photo part.
pub fn is_supported_photo_type(media_type: &str) -> bool {
    media_type.starts_with("image/")
}

/// Decode an uploaded document into a raster image.
///
/// Paginated documents are rendered at the first page's native point size;
/// every other page is discarded. Direct image uploads are decoded as-is.
pub fn rasterize_document(bytes: &[u8], media_type: &str) -> Result<DynamicImage, DocumentError> {
    if media_type == PDF_MEDIA_TYPE {
        render_first_page(bytes)
    } else if media_type.starts_with("image/") {
        decode_image(bytes)
    } else {
        Err(DocumentError::UnsupportedMediaType(media_type.to_string()))
    }
}

/// Decode raw image bytes (any format the `image` crate recognizes).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, DocumentError> {
    Ok(image::load_from_memory(bytes)?)
}

fn render_first_page(bytes: &[u8]) -> Result<DynamicImage, DocumentError> {
    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| DocumentError::PdfBackend(e.to_string()))?;
    let pdfium = Pdfium::new(bindings);

    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| DocumentError::PdfDecode(e.to_string()))?;

    let pages = document.pages();
    let page_count = pages.len();
    if page_count == 0 {
        return Err(DocumentError::EmptyDocument);
    }
    if page_count > 1 {
        tracing::debug!(pages = page_count, "multi-page document, rendering page 1 only");
    }

    let page = pages
        .get(0)
        .map_err(|e| DocumentError::PdfRender(e.to_string()))?;

    // 1 pixel per point keeps the page at its native resolution.
    let target_width = page.width().value.round().max(1.0) as i32;
    let bitmap = page
        .render_with_config(&PdfRenderConfig::new().set_target_width(target_width))
        .map_err(|e| DocumentError::PdfRender(e.to_string()))?;

    Ok(bitmap.as_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb([120, 130, 140]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_media_type_support() {
        assert!(is_supported_document_type("application/pdf"));
        assert!(is_supported_document_type("image/png"));
        assert!(is_supported_document_type("image/jpeg"));
        assert!(!is_supported_document_type("text/plain"));
        assert!(is_supported_photo_type("image/jpeg"));
        assert!(!is_supported_photo_type("application/pdf"));
    }

    #[test]
    fn test_rasterize_direct_image() {
        let bytes = png_bytes(32, 24);
        let img = rasterize_document(&bytes, "image/png").unwrap();
        assert_eq!((img.width(), img.height()), (32, 24));
    }

    #[test]
    fn test_rasterize_rejects_unknown_type() {
        let err = rasterize_document(b"whatever", "application/zip").unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedMediaType(_)));
    }

    #[test]
    fn test_rasterize_rejects_garbage_image_bytes() {
        let err = rasterize_document(b"not an image", "image/png").unwrap_err();
        assert!(matches!(err, DocumentError::Decode(_)));
    }
}
