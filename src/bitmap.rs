// SPDX-License-Identifier: GPL-3.0-or-later
//! A pure, file-system-free codec for 24-bit uncompressed bottom-up BMP
//! bytes: 14-byte file header, 40-byte DIB header, then padded BGR
//! scanlines. Reading or writing the bytes to disk is left to the caller.
use tracing::trace;

use crate::error::{Error, Result};
use crate::image::Image;

const FILE_HEADER_LEN: usize = 14;
const DIB_HEADER_LEN: usize = 40;
const PIXEL_DATA_OFFSET: u32 = (FILE_HEADER_LEN + DIB_HEADER_LEN) as u32;

/// Serialize `image` as a 24-bit bottom-up BMP byte stream.
pub fn encode(image: &Image) -> Vec<u8> {
    let width = image.width();
    let height = image.height();
    let pixel_data_len = image.data().len() as u32;
    let file_size = PIXEL_DATA_OFFSET + pixel_data_len;

    let mut out = Vec::with_capacity(file_size as usize);

    // File header.
    out.extend_from_slice(b"BM");
    out.extend_from_slice(&file_size.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
    out.extend_from_slice(&0u16.to_le_bytes()); // reserved
    out.extend_from_slice(&PIXEL_DATA_OFFSET.to_le_bytes());

    // DIB header (BITMAPINFOHEADER).
    out.extend_from_slice(&(DIB_HEADER_LEN as u32).to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    out.extend_from_slice(&(height as i32).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&24u16.to_le_bytes()); // bits per pixel
    out.extend_from_slice(&0u32.to_le_bytes()); // compression
    out.extend_from_slice(&pixel_data_len.to_le_bytes()); // image size
    out.extend_from_slice(&0i32.to_le_bytes()); // x pixels per metre
    out.extend_from_slice(&0i32.to_le_bytes()); // y pixels per metre
    out.extend_from_slice(&0u32.to_le_bytes()); // colours used
    out.extend_from_slice(&0u32.to_le_bytes()); // colours significant

    out.extend_from_slice(image.data());
    trace!(width, height, file_size, "encoded image as bmp");
    out
}

/// Parse a 24-bit bottom-up BMP byte stream into an [`Image`].
pub fn decode(bytes: &[u8]) -> Result<Image> {
    if bytes.len() < FILE_HEADER_LEN + DIB_HEADER_LEN {
        return Err(Error::DimensionMismatch {
            expected_width: 0,
            expected_height: 0,
            actual_width: 0,
            actual_height: 0,
        });
    }
    if &bytes[0..2] != b"BM" {
        return Err(Error::InvalidConfiguration {
            field: "bitmap.magic",
            value: format!("{:?}", &bytes[0..2]),
            reason: "BMP file header must start with 'BM'",
        });
    }
    let pixel_data_offset = u32::from_le_bytes(bytes[10..14].try_into().unwrap());
    let width = i32::from_le_bytes(bytes[18..22].try_into().unwrap());
    let height = i32::from_le_bytes(bytes[22..26].try_into().unwrap());
    let bits_per_pixel = u16::from_le_bytes(bytes[28..30].try_into().unwrap());
    let compression = u32::from_le_bytes(bytes[30..34].try_into().unwrap());

    if bits_per_pixel != 24 || compression != 0 {
        return Err(Error::InvalidConfiguration {
            field: "bitmap.bitsPerPixel",
            value: format!("{bits_per_pixel}bpp, compression={compression}"),
            reason: "only uncompressed 24-bit bitmaps are supported",
        });
    }
    if width <= 0 || height <= 0 {
        return Err(Error::InvalidConfiguration {
            field: "bitmap.dimensions",
            value: format!("{width}x{height}"),
            reason: "bottom-up bitmaps must have positive, non-flipped dimensions",
        });
    }
    let width = width as u32;
    let height = height as u32;

    let stride = Image::scanline_size(width);
    let expected_len = pixel_data_offset as usize + stride as usize * height as usize;
    if bytes.len() < expected_len {
        return Err(Error::DimensionMismatch {
            expected_width: width,
            expected_height: height,
            actual_width: width,
            actual_height: ((bytes.len().saturating_sub(pixel_data_offset as usize))
                / stride.max(1) as usize) as u32,
        });
    }

    let pixel_data = bytes[pixel_data_offset as usize..expected_len].to_vec();
    trace!(width, height, "decoded bmp into image");
    Image::from_raw_parts(width, height, pixel_data)
}

#[cfg(test)]
mod test {
    use super::{decode, encode};
    use crate::image::{Image, Pixel};

    #[test]
    fn round_trips_an_arbitrary_image() {
        let mut image = Image::create(7, 5).unwrap();
        for y in 0..5 {
            for x in 0..7 {
                image.set(x, y, Pixel::new((x * 3) as u8, (y * 5) as u8, 128));
            }
        }
        let bytes = encode(&image);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(image, decoded);
    }

    #[test]
    fn header_layout_matches_the_24_bit_bottom_up_format() {
        let image = Image::create(2, 2).unwrap();
        let bytes = encode(&image);
        assert_eq!(&bytes[0..2], b"BM");
        assert_eq!(u16::from_le_bytes(bytes[28..30].try_into().unwrap()), 24);
        assert_eq!(u32::from_le_bytes(bytes[30..34].try_into().unwrap()), 0);
        assert_eq!(u32::from_le_bytes(bytes[10..14].try_into().unwrap()), 54);
        assert_eq!(bytes.len(), 54 + image.data().len());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut image = Image::create(2, 2).unwrap();
        image.set(0, 0, Pixel::WHITE);
        let mut bytes = encode(&image);
        bytes[0] = b'X';
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_truncated_pixel_data() {
        let image = Image::create(4, 4).unwrap();
        let mut bytes = encode(&image);
        bytes.truncate(bytes.len() - 5);
        assert!(decode(&bytes).is_err());
    }
}
