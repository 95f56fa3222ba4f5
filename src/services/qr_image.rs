use image::{ImageBuffer, Luma};
use qrcode::render::svg;
use qrcode::QrCode;

/// Pixels per QR module in PNG output
const MODULE_SIZE: u32 = 10;

/// Light modules around the symbol, as required by scanners
const QUIET_ZONE: u32 = 4;

#[derive(thiserror::Error, Debug)]
pub enum QrGenerationError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    ImageError(#[from] image::ImageError),
}

/// URL encoded into a token's QR code, opening the registration page for it
pub fn registration_url(base_url: &str, code: &str) -> String {
    format!("{}/register?code={}", base_url.trim_end_matches('/'), code)
}

/// Renders `content` as an SVG QR code
pub fn generate_qr_svg(content: &str) -> Result<String, QrGenerationError> {
    let code = QrCode::new(content.as_bytes())?;

    let svg = code
        .render::<svg::Color>()
        .min_dimensions(300, 300)
        .quiet_zone(true)
        .build();

    Ok(svg)
}

/// Renders `content` as a grayscale PNG QR code
pub fn generate_qr_png(content: &str) -> Result<Vec<u8>, QrGenerationError> {
    let code = QrCode::new(content.as_bytes())?;

    let width = code.width() as u32;
    let img_size = (width + QUIET_ZONE * 2) * MODULE_SIZE;

    let img = ImageBuffer::<Luma<u8>, Vec<u8>>::from_fn(img_size, img_size, |x, y| {
        let module_x = (x / MODULE_SIZE).checked_sub(QUIET_ZONE);
        let module_y = (y / MODULE_SIZE).checked_sub(QUIET_ZONE);

        match (module_x, module_y) {
            (Some(mx), Some(my)) if mx < width && my < width => {
                match code[(mx as usize, my as usize)] {
                    qrcode::types::Color::Dark => Luma([0u8]),
                    qrcode::types::Color::Light => Luma([255u8]),
                }
            }
            _ => Luma([255u8]),
        }
    });

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img).write_to(
        &mut std::io::Cursor::new(&mut png_data),
        image::ImageFormat::Png,
    )?;

    Ok(png_data)
}
