// SPDX-License-Identifier: GPL-3.0-or-later
//! A median-of-N background model: a FIFO ring of recent frames, with the
//! background synthesised as the per-byte median across the ring.
use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::config::MedianConfig;
use crate::error::{Error, Result};
use crate::executor::{Executor, StridedMut};
use crate::image::Image;

/// A background model that synthesises the background as the per-byte
/// median of the last `N` frames.
#[derive(Clone, Debug)]
pub struct MedianModel {
    width: u32,
    height: u32,
    stride: u32,
    capacity: usize,
    ring: VecDeque<Vec<u8>>,
}

impl MedianModel {
    /// Build a model whose ring of `config.n` slots is initially `N`
    /// copies of `seed`'s bytes.
    pub fn from_seed(config: &MedianConfig, seed: &Image) -> Result<Self> {
        config.validate()?;
        let capacity = config.n as usize;
        let mut ring = VecDeque::with_capacity(capacity);
        for _ in 0..capacity {
            ring.push_back(seed.data().to_vec());
        }
        debug!(
            width = seed.width(),
            height = seed.height(),
            capacity,
            "initialised median model from seed"
        );
        Ok(Self {
            width: seed.width(),
            height: seed.height(),
            stride: seed.stride(),
            capacity,
            ring,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn require_matching_frame(&self, frame: &Image) -> Result<()> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(Error::DimensionMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        Ok(())
    }

    fn median_byte(&self, byte_index: usize) -> u8 {
        let mut values: Vec<u8> = self.ring.iter().map(|buffer| buffer[byte_index]).collect();
        values.sort_unstable();
        // For an even-length ring, take the lower median.
        values[(values.len() - 1) / 2]
    }

    fn byte_len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    /// Synthesise the background as the per-byte median across the ring.
    pub fn synthesise_background(&self) -> Result<Image> {
        let mut out = Image::create(self.width, self.height)?;
        for i in 0..self.byte_len() {
            out.data_mut()[i] = self.median_byte(i);
        }
        trace!(width = self.width, height = self.height, "synthesised median background");
        Ok(out)
    }

    /// Parallel variant of [`Self::synthesise_background`], partitioned by
    /// byte index.
    pub fn synthesise_background_parallel(&self, executor: &Executor) -> Result<Image> {
        let mut out = Image::create(self.width, self.height)?;
        let len = self.byte_len();
        let handle = StridedMut::new(out.data_mut());
        executor.for_each(len, |i| unsafe {
            handle.write(i, self.median_byte(i));
        })?;
        Ok(out)
    }

    /// Synthesise the background, take the absolute difference against
    /// `frame`, greyscale it, and segment it at `threshold`.
    pub fn classify(&self, frame: &Image, threshold: u8) -> Result<Image> {
        self.require_matching_frame(frame)?;
        let background = self.synthesise_background()?;
        let mut difference = background.absolute_difference(frame)?;
        difference.greyscale();
        difference.segment(threshold)
    }

    /// Parallel variant of [`Self::classify`], using the parallel variant of
    /// each constituent step.
    pub fn classify_parallel(&self, frame: &Image, threshold: u8, executor: &Executor) -> Result<Image> {
        self.require_matching_frame(frame)?;
        let background = self.synthesise_background_parallel(executor)?;
        let mut difference = background.absolute_difference_parallel(frame, executor)?;
        difference.greyscale_parallel(executor)?;
        difference.segment_parallel(threshold, executor)
    }

    /// Evict the oldest ring slot and append a copy of `frame` in which
    /// every foreground byte (per `mask`) has been replaced with the
    /// current synthesised background, so foreground pixels never pollute
    /// the ring.
    pub fn update(&mut self, mask: &Image, frame: &Image) -> Result<()> {
        self.require_matching_frame(mask)?;
        self.require_matching_frame(frame)?;
        let background = self.synthesise_background()?;
        let mut new_frame = frame.data().to_vec();
        for i in 0..new_frame.len() {
            if mask.data()[i] == 255 {
                new_frame[i] = background.data()[i];
            }
        }
        self.ring.pop_front();
        self.ring.push_back(new_frame);
        trace!(width = self.width, height = self.height, "updated median model");
        Ok(())
    }

    /// Classify `frame` at `threshold`, then fold it back into the ring
    /// using the mask just produced.
    pub fn classify_and_update(&mut self, frame: &Image, threshold: u8) -> Result<Image> {
        let mask = self.classify(frame, threshold)?;
        self.update(&mask, frame)?;
        Ok(mask)
    }
}
