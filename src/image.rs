// SPDX-License-Identifier: GPL-3.0-or-later
//! A fixed-size 24-bit RGB image: the shared in-memory format every stage of
//! the pipeline reads from and writes into.
use tracing::trace;

use crate::error::{Error, Result};
use crate::executor::{Executor, StridedMut};

/// A single RGB pixel, 0-255 per channel.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Pixel {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Pixel {
    pub const BLACK: Pixel = Pixel { r: 0, g: 0, b: 0 };
    pub const WHITE: Pixel = Pixel {
        r: 255,
        g: 255,
        b: 255,
    };

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// A foreground-tagged pixel in a segmentation mask is pure white.
    pub fn is_foreground(&self) -> bool {
        *self == Self::WHITE
    }

    /// A background-tagged pixel in a segmentation mask is pure black.
    pub fn is_background(&self) -> bool {
        *self == Self::BLACK
    }
}

/// A fixed-size 24-bit RGB image, stored bottom-up with B, G, R byte order
/// per pixel and scanlines padded to a multiple of 4 bytes, matching the
/// on-disk BMP layout this crate's [`crate::bitmap`] codec reads and writes.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    stride: u32,
    data: Vec<u8>,
}

impl Image {
    /// The padded scanline length in bytes for an image of the given width:
    /// `ceil(3*width / 4) * 4`.
    pub fn scanline_size(width: u32) -> u32 {
        ((3 * width + 3) / 4) * 4
    }

    /// Allocate a zeroed (all-black) image of the given dimensions.
    pub fn create(width: u32, height: u32) -> Result<Self> {
        let stride = Self::scanline_size(width);
        let len = stride as usize * height as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| Error::AllocationFailure { requested: len })?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// Reconstruct an image from a pre-populated, correctly-sized byte
    /// buffer. Used internally by [`crate::bitmap::decode`]; `data.len()`
    /// must equal `scanline_size(width) * height`.
    pub(crate) fn from_raw_parts(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let stride = Self::scanline_size(width);
        let expected = stride as usize * height as usize;
        if data.len() != expected {
            return Err(Error::DimensionMismatch {
                expected_width: width,
                expected_height: height,
                actual_width: width,
                actual_height: (data.len() / stride.max(1) as usize) as u32,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The padded scanline length in bytes for this image.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn in_bounds(&self, x: i64, y: i64) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// The byte offset of pixel `(x, y)` within a buffer of the given
    /// `stride`/`height`. Exposed to sibling modules that need to drive a
    /// [`StridedMut`] directly over an image's bytes.
    pub(crate) fn pixel_offset(stride: u32, height: u32, x: u32, y: u32) -> usize {
        (height - 1 - y) as usize * stride as usize + 3 * x as usize
    }

    fn require_same_dimensions(&self, other: &Image) -> Result<()> {
        if self.width != other.width || self.height != other.height {
            return Err(Error::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: other.width,
                actual_height: other.height,
            });
        }
        Ok(())
    }

    /// Read the pixel at `(x, y)`. Out-of-bounds coordinates return
    /// [`Pixel::BLACK`] rather than failing.
    pub fn get(&self, x: i64, y: i64) -> Pixel {
        if !self.in_bounds(x, y) {
            return Pixel::default();
        }
        let offset = Self::pixel_offset(self.stride, self.height, x as u32, y as u32);
        Pixel {
            b: self.data[offset],
            g: self.data[offset + 1],
            r: self.data[offset + 2],
        }
    }

    /// Write `pixel` at `(x, y)`. Returns `false` and leaves the image
    /// unchanged for out-of-bounds coordinates.
    pub fn set(&mut self, x: i64, y: i64, pixel: Pixel) -> bool {
        if !self.in_bounds(x, y) {
            return false;
        }
        let offset = Self::pixel_offset(self.stride, self.height, x as u32, y as u32);
        self.data[offset] = pixel.b;
        self.data[offset + 1] = pixel.g;
        self.data[offset + 2] = pixel.r;
        true
    }

    /// Count pixels that exactly equal `target`.
    pub fn count_matching(&self, target: Pixel) -> usize {
        let mut count = 0;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x as i64, y as i64) == target {
                    count += 1;
                }
            }
        }
        count
    }

    /// Parallel variant of [`Self::count_matching`], partitioned by column.
    pub fn count_matching_parallel(&self, target: Pixel, executor: &Executor) -> Result<usize> {
        let width = self.width;
        let height = self.height;
        let stride = self.stride;
        let data = &self.data;
        executor.for_each_fold(
            width as usize,
            0usize,
            |x, acc| {
                let x = x as u32;
                for y in 0..height {
                    let offset = Self::pixel_offset(stride, height, x, y);
                    let pixel = Pixel {
                        b: data[offset],
                        g: data[offset + 1],
                        r: data[offset + 2],
                    };
                    if pixel == target {
                        *acc += 1;
                    }
                }
            },
            |a, b| a + b,
        )
    }

    /// Replace every pixel with `((r+g+b)/3, (r+g+b)/3, (r+g+b)/3)`,
    /// truncating the integer average.
    pub fn greyscale(&mut self) {
        for y in 0..self.height {
            for x in 0..self.width {
                let p = self.get(x as i64, y as i64);
                let avg = ((p.r as u32 + p.g as u32 + p.b as u32) / 3) as u8;
                self.set(x as i64, y as i64, Pixel::new(avg, avg, avg));
            }
        }
    }

    /// Parallel variant of [`Self::greyscale`], partitioned by column.
    pub fn greyscale_parallel(&mut self, executor: &Executor) -> Result<()> {
        let height = self.height;
        let stride = self.stride;
        let handle = StridedMut::new(&mut self.data);
        executor.for_each(self.width as usize, move |x| {
            let x = x as u32;
            for y in 0..height {
                let offset = Self::pixel_offset(stride, height, x, y);
                // SAFETY: each column x is assigned to exactly one worker, and every
                // offset this loop touches for that worker is derived solely from
                // (x, y) pairs with that x, so no other worker ever touches it.
                unsafe {
                    let b = handle.with_mut(offset, |v| *v);
                    let g = handle.with_mut(offset + 1, |v| *v);
                    let r = handle.with_mut(offset + 2, |v| *v);
                    let avg = ((r as u32 + g as u32 + b as u32) / 3) as u8;
                    handle.write(offset, avg);
                    handle.write(offset + 1, avg);
                    handle.write(offset + 2, avg);
                }
            }
        })
    }

    /// The byte-wise absolute difference between two equally-sized images,
    /// operating on raw bytes (including scanline padding).
    pub fn absolute_difference(&self, other: &Image) -> Result<Image> {
        self.require_same_dimensions(other)?;
        let mut out = Image::create(self.width, self.height)?;
        for i in 0..self.data.len() {
            out.data[i] = self.data[i].abs_diff(other.data[i]);
        }
        trace!(width = self.width, height = self.height, "absolute difference");
        Ok(out)
    }

    /// Parallel variant of [`Self::absolute_difference`], partitioned by
    /// byte index.
    pub fn absolute_difference_parallel(&self, other: &Image, executor: &Executor) -> Result<Image> {
        self.require_same_dimensions(other)?;
        let mut out = Image::create(self.width, self.height)?;
        let a = &self.data;
        let b = &other.data;
        let handle = StridedMut::new(&mut out.data);
        executor.for_each(a.len(), |i| unsafe {
            handle.write(i, a[i].abs_diff(b[i]));
        })?;
        Ok(out)
    }

    /// A byte-wise threshold: 255 where the source byte is strictly greater
    /// than `threshold`, else 0. Not pixel-aware, it operates on every
    /// byte, including padding, which is typically applied to a
    /// greyscaled difference image.
    pub fn segment(&self, threshold: u8) -> Result<Image> {
        let mut out = Image::create(self.width, self.height)?;
        for (i, byte) in self.data.iter().enumerate() {
            out.data[i] = if *byte > threshold { 255 } else { 0 };
        }
        trace!(threshold, "segmented image");
        Ok(out)
    }

    /// Parallel variant of [`Self::segment`], partitioned by byte index.
    pub fn segment_parallel(&self, threshold: u8, executor: &Executor) -> Result<Image> {
        let mut out = Image::create(self.width, self.height)?;
        let src = &self.data;
        let handle = StridedMut::new(&mut out.data);
        executor.for_each(src.len(), |i| unsafe {
            handle.write(i, if src[i] > threshold { 255 } else { 0 });
        })?;
        Ok(out)
    }
}

impl std::fmt::Display for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Image({}x{}, stride={})",
            self.width, self.height, self.stride
        )
    }
}
