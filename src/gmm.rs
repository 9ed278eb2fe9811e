// SPDX-License-Identifier: GPL-3.0-or-later
//! A per-pixel Gaussian mixture background model.
//!
//! Each pixel keeps a fixed-size mixture of Gaussian components over its
//! three colour channels; the mixture with the most "background-like"
//! evidence dominates classification, and unlikely observations eventually
//! displace the weakest component rather than growing the mixture.
use tracing::{debug, trace};

use crate::config::GmmConfig;
use crate::error::{Error, Result};
use crate::executor::{Executor, StridedMut};
use crate::image::{Image, Pixel};

/// One Gaussian component of one pixel's mixture.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GaussianComponent {
    pub mean_r: f32,
    pub mean_g: f32,
    pub mean_b: f32,
    /// Variance, shared across all three channels.
    pub variance: f32,
    pub prior: f32,
}

impl GaussianComponent {
    fn from_pixel(pixel: Pixel, variance: f32, prior: f32) -> Self {
        Self {
            mean_r: pixel.r as f32,
            mean_g: pixel.g as f32,
            mean_b: pixel.b as f32,
            variance,
            prior,
        }
    }

    /// A pixel matches this component iff every channel lies within
    /// `2.5 * variance` of the component's mean for that channel. `variance`
    /// is used directly as the tolerance radius, not its square root.
    fn matches(&self, pixel: Pixel) -> bool {
        let tolerance = 2.5 * self.variance;
        channel_within(pixel.r, self.mean_r, tolerance)
            && channel_within(pixel.g, self.mean_g, tolerance)
            && channel_within(pixel.b, self.mean_b, tolerance)
    }

    fn rating(&self) -> f32 {
        self.prior / self.variance
    }
}

fn channel_within(value: u8, mean: f32, tolerance: f32) -> bool {
    let value = value as f32;
    (mean - tolerance) < value && value < (mean + tolerance)
}

/// The fixed-size set of Gaussian components modelling a single pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianMixture {
    components: Vec<GaussianComponent>,
}

impl GaussianMixture {
    fn seeded(pixel: Pixel, k: usize, init_variance: f32) -> Self {
        let prior = 1.0 / k as f32;
        Self {
            components: (0..k)
                .map(|_| GaussianComponent::from_pixel(pixel, init_variance, prior))
                .collect(),
        }
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    /// Indices of `components`, sorted by `prior` descending. Ties keep
    /// their relative order (a stable sort).
    fn sorted_by_prior_desc(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.components.len()).collect();
        indices.sort_by(|&a, &b| {
            self.components[b]
                .prior
                .partial_cmp(&self.components[a].prior)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        indices
    }

    fn classify(&self, pixel: Pixel, t: f32) -> bool {
        let mut wsum = 0.0f32;
        for idx in self.sorted_by_prior_desc() {
            if wsum > t {
                break;
            }
            wsum += self.components[idx].prior;
            if self.components[idx].matches(pixel) {
                return false; // background
            }
        }
        true // foreground
    }

    fn worst_index(&self) -> usize {
        self.components
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.rating().partial_cmp(&b.rating()).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    fn best_index(&self) -> usize {
        self.components
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.rating().partial_cmp(&b.rating()).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(index, _)| index)
            .unwrap_or(0)
    }

    fn update(&mut self, pixel: Pixel, foreground: bool, alpha: f32, t: f32, new_component_variance: f32) {
        if foreground {
            let worst = self.worst_index();
            self.components[worst] = GaussianComponent::from_pixel(pixel, new_component_variance, 0.5 / self.components.len() as f32);
            return;
        }

        let val_r = pixel.r as f32;
        let val_g = pixel.g as f32;
        let val_b = pixel.b as f32;
        let avg_val = (val_r + val_g + val_b) / 3.0;

        let mut matched = None;
        for (index, component) in self.components.iter().enumerate() {
            if component.matches(pixel) {
                matched = Some(index);
                break;
            }
        }

        for (index, component) in self.components.iter_mut().enumerate() {
            if Some(index) == matched {
                let avg_mean = (component.mean_r + component.mean_g + component.mean_b) / 3.0;
                let rho = alpha * gaussian_pdf(avg_val, avg_mean, component.variance);
                component.mean_r = (1.0 - rho) * component.mean_r + rho * val_r;
                component.mean_g = (1.0 - rho) * component.mean_g + rho * val_g;
                component.mean_b = (1.0 - rho) * component.mean_b + rho * val_b;
                let delta = avg_val - avg_mean;
                component.variance = (1.0 - rho) * component.variance + rho * powt(delta, t) * delta;
                component.prior = (1.0 - alpha) * component.prior + alpha;
            } else {
                component.prior = (1.0 - alpha) * component.prior;
            }
        }
    }

    fn synthesise(&self) -> Pixel {
        let best = &self.components[self.best_index()];
        Pixel::new(
            clamp_channel(best.mean_r),
            clamp_channel(best.mean_g),
            clamp_channel(best.mean_b),
        )
    }
}

fn clamp_channel(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

/// The standard Gaussian density, evaluated with standard deviation
/// `sqrt(|variance|)`.
fn gaussian_pdf(value: f32, mean: f32, variance: f32) -> f32 {
    let std_dev = variance.abs().sqrt();
    let coeff = 1.0 / (std_dev * (2.0 * std::f32::consts::PI).sqrt());
    let exponent = -0.5 * ((value - mean) / std_dev).powi(2);
    coeff * exponent.exp()
}

/// Sign-preserving exponentiation: `sign(x) * |x|^t`. `t` is a
/// background-mass fraction, not a meaningful exponent here, but every
/// caller passes it through unchanged for bug-compatibility.
fn powt(x: f32, t: f32) -> f32 {
    if x < 0.0 {
        -(-x).powf(t)
    } else {
        x.powf(t)
    }
}

/// A per-pixel Gaussian mixture background model over a fixed `width` x
/// `height` grid of mixtures.
#[derive(Clone, Debug)]
pub struct GaussianModel {
    width: u32,
    height: u32,
    k: usize,
    t: f32,
    alpha: f32,
    new_component_variance: f32,
    mixtures: Vec<GaussianMixture>,
}

impl GaussianModel {
    /// Build a model from a seed image: every component of every mixture is
    /// initialised to that pixel's colour, `config.init_variance`, and prior
    /// `1/K`.
    pub fn from_seed(config: &GmmConfig, seed: &Image) -> Result<Self> {
        config.validate()?;
        let width = seed.width();
        let height = seed.height();
        let k = config.k as usize;
        let mut mixtures = Vec::new();
        mixtures
            .try_reserve_exact(width as usize * height as usize)
            .map_err(|_| Error::AllocationFailure {
                requested: width as usize * height as usize,
            })?;
        for y in 0..height {
            for x in 0..width {
                let pixel = seed.get(x as i64, y as i64);
                mixtures.push(GaussianMixture::seeded(pixel, k, config.init_variance));
            }
        }
        debug!(width, height, k, "initialised gaussian model from seed");
        Ok(Self {
            width,
            height,
            k,
            t: config.t,
            alpha: config.alpha,
            new_component_variance: config.new_component_variance(),
            mixtures,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn mixture(&self, x: u32, y: u32) -> &GaussianMixture {
        &self.mixtures[self.index(x, y)]
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
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

    /// Classify every pixel of `frame` as foreground or background, writing
    /// a fresh binary mask image.
    pub fn classify(&self, frame: &Image) -> Result<Image> {
        self.require_matching_frame(frame)?;
        let mut mask = Image::create(self.width, self.height)?;
        for y in 0..self.height {
            for x in 0..self.width {
                let pixel = frame.get(x as i64, y as i64);
                let foreground = self.mixture(x, y).classify(pixel, self.t);
                mask.set(x as i64, y as i64, if foreground { Pixel::WHITE } else { Pixel::BLACK });
            }
        }
        trace!(width = self.width, height = self.height, "classified frame");
        Ok(mask)
    }

    /// Parallel variant of [`Self::classify`], partitioned by column.
    pub fn classify_parallel(&self, frame: &Image, executor: &Executor) -> Result<Image> {
        self.require_matching_frame(frame)?;
        let mut mask = Image::create(self.width, self.height)?;
        let height = self.height;
        let stride = mask.stride();
        let t = self.t;
        let mixtures = &self.mixtures;
        let width = self.width;
        let handle = StridedMut::new(mask.data_mut());
        executor.for_each(width as usize, move |x| {
            let x = x as u32;
            for y in 0..height {
                let pixel = frame.get(x as i64, y as i64);
                let foreground = mixtures[y as usize * width as usize + x as usize].classify(pixel, t);
                let value = if foreground { Pixel::WHITE } else { Pixel::BLACK };
                let offset = Image::pixel_offset(stride, height, x, y);
                // SAFETY: column x is handled by exactly one worker.
                unsafe {
                    handle.write(offset, value.b);
                    handle.write(offset + 1, value.g);
                    handle.write(offset + 2, value.r);
                }
            }
        })?;
        Ok(mask)
    }

    /// Update every mixture from `frame`, using `mask` to decide whether
    /// each pixel is foreground (replace the worst component) or background
    /// (update the first matching component, decay the rest).
    pub fn update(&mut self, mask: &Image, frame: &Image) -> Result<()> {
        self.require_matching_frame(mask)?;
        self.require_matching_frame(frame)?;
        let (width, height) = (self.width, self.height);
        for y in 0..height {
            for x in 0..width {
                let foreground = mask.get(x as i64, y as i64).is_foreground();
                let pixel = frame.get(x as i64, y as i64);
                let idx = self.index(x, y);
                self.mixtures[idx].update(pixel, foreground, self.alpha, self.t, self.new_component_variance);
            }
        }
        trace!(width, height, "updated gaussian model");
        Ok(())
    }

    /// Parallel variant of [`Self::update`], partitioned by column. Each
    /// worker owns a disjoint set of columns, so mixtures are never touched
    /// by more than one worker.
    pub fn update_parallel(&mut self, mask: &Image, frame: &Image, executor: &Executor) -> Result<()> {
        self.require_matching_frame(mask)?;
        self.require_matching_frame(frame)?;
        let (width, height) = (self.width, self.height);
        let alpha = self.alpha;
        let t = self.t;
        let new_component_variance = self.new_component_variance;
        let handle = StridedMut::new(&mut self.mixtures);
        executor.for_each(width as usize, move |x| {
            let x = x as u32;
            for y in 0..height {
                let foreground = mask.get(x as i64, y as i64).is_foreground();
                let pixel = frame.get(x as i64, y as i64);
                let index = y as usize * width as usize + x as usize;
                // SAFETY: column x is handled by exactly one worker, and this
                // mixture's index is a function solely of (x, y) for that x.
                unsafe {
                    handle.with_mut(index, |mixture| {
                        mixture.update(pixel, foreground, alpha, t, new_component_variance)
                    });
                }
            }
        })
    }

    /// Divide every mixture's priors by their sum so they total 1.
    pub fn normalise(&mut self) -> Result<()> {
        for mixture in &mut self.mixtures {
            normalise_mixture(mixture);
        }
        Ok(())
    }

    /// Parallel variant of [`Self::normalise`], partitioned by column.
    pub fn normalise_parallel(&mut self, executor: &Executor) -> Result<()> {
        let width = self.width;
        let height = self.height;
        let handle = StridedMut::new(&mut self.mixtures);
        executor.for_each(width as usize, move |x| {
            let x = x as u32;
            for y in 0..height {
                let index = y as usize * width as usize + x as usize;
                // SAFETY: column x is handled by exactly one worker.
                unsafe {
                    handle.with_mut(index, normalise_mixture);
                }
            }
        })
    }

    /// Build the most likely background image: for each pixel, the
    /// component maximising `prior / variance`, clamped to `[0, 255]`.
    pub fn synthesise_background(&self) -> Result<Image> {
        let mut out = Image::create(self.width, self.height)?;
        for y in 0..self.height {
            for x in 0..self.width {
                out.set(x as i64, y as i64, self.mixture(x, y).synthesise());
            }
        }
        Ok(out)
    }

    /// Parallel variant of [`Self::synthesise_background`], partitioned by
    /// column.
    pub fn synthesise_background_parallel(&self, executor: &Executor) -> Result<Image> {
        let mut out = Image::create(self.width, self.height)?;
        let height = self.height;
        let stride = out.stride();
        let width = self.width;
        let mixtures = &self.mixtures;
        let handle = StridedMut::new(out.data_mut());
        executor.for_each(width as usize, move |x| {
            let x = x as u32;
            for y in 0..height {
                let pixel = mixtures[y as usize * width as usize + x as usize].synthesise();
                let offset = Image::pixel_offset(stride, height, x, y);
                // SAFETY: column x is handled by exactly one worker.
                unsafe {
                    handle.write(offset, pixel.b);
                    handle.write(offset + 1, pixel.g);
                    handle.write(offset + 2, pixel.r);
                }
            }
        })?;
        Ok(out)
    }

    /// Classify `frame`, then fold it back into the model using the mask
    /// just produced. A convenience over calling the two operations
    /// separately.
    pub fn classify_and_update(&mut self, frame: &Image) -> Result<Image> {
        let mask = self.classify(frame)?;
        self.update(&mask, frame)?;
        Ok(mask)
    }
}

fn normalise_mixture(mixture: &mut GaussianMixture) {
    let sum: f32 = mixture.components.iter().map(|c| c.prior).sum();
    if sum == 0.0 {
        return;
    }
    for component in &mut mixture.components {
        component.prior /= sum;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_cmp::assert_approx_eq;

    fn seed_image(width: u32, height: u32, pixel: Pixel) -> Image {
        let mut image = Image::create(width, height).unwrap();
        for y in 0..height {
            for x in 0..width {
                image.set(x as i64, y as i64, pixel);
            }
        }
        image
    }

    #[test]
    fn classify_on_seed_image_is_all_background() {
        let config = GmmConfig {
            init_variance: 16.0,
            ..GmmConfig::default()
        };
        let seed = seed_image(4, 4, Pixel::new(100, 120, 140));
        let model = GaussianModel::from_seed(&config, &seed).unwrap();
        let mask = model.classify(&seed).unwrap();
        assert_eq!(mask.count_matching(Pixel::BLACK), 16);
        assert_eq!(mask.count_matching(Pixel::WHITE), 0);
    }

    #[test]
    fn normalise_makes_priors_sum_to_one() {
        let config = GmmConfig::default();
        let seed = seed_image(3, 3, Pixel::new(10, 10, 10));
        let mut model = GaussianModel::from_seed(&config, &seed).unwrap();
        // Perturb priors so they no longer sum to 1.
        for mixture in &mut model.mixtures {
            for component in &mut mixture.components {
                component.prior *= 3.0;
            }
        }
        model.normalise().unwrap();
        for mixture in &model.mixtures {
            let sum: f32 = mixture.components.iter().map(|c| c.prior).sum();
            assert_approx_eq!(f32, sum, 1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn update_replaces_worst_component_on_foreground() {
        let config = GmmConfig {
            k: 2,
            ..GmmConfig::default()
        };
        let seed = seed_image(1, 1, Pixel::new(10, 10, 10));
        let mut model = GaussianModel::from_seed(&config, &seed).unwrap();
        model.mixtures[0].components[0].prior = 0.9;
        model.mixtures[0].components[0].variance = 100.0;
        model.mixtures[0].components[1].prior = 0.1;
        model.mixtures[0].components[1].variance = 1.0;

        let mut mask = Image::create(1, 1).unwrap();
        mask.set(0, 0, Pixel::WHITE);
        let frame = seed_image(1, 1, Pixel::new(200, 5, 5));
        model.update(&mask, &frame).unwrap();

        // Component 0 has the worse prior/variance rating (low prior, high
        // variance) and should have been replaced with the new observation.
        let replaced = &model.mixtures[0].components[0];
        assert_eq!(replaced.mean_r, 200.0);
        assert_eq!(replaced.variance, config.new_component_variance());
        assert_eq!(replaced.prior, 0.5 / 2.0);
        // Component 1 is untouched by a foreground update.
        assert_eq!(model.mixtures[0].components[1].variance, 1.0);
    }

    #[test]
    fn synthesise_background_clamps_means() {
        let config = GmmConfig::default();
        let seed = seed_image(1, 1, Pixel::new(250, 250, 250));
        let mut model = GaussianModel::from_seed(&config, &seed).unwrap();
        for component in &mut model.mixtures[0].components {
            component.mean_r += 50.0;
            component.variance = 1.0;
        }
        let background = model.synthesise_background().unwrap();
        assert_eq!(background.get(0, 0).r, 255);
    }

    #[test]
    fn classify_sequential_and_parallel_agree() {
        let config = GmmConfig::default();
        let seed = seed_image(11, 7, Pixel::new(80, 90, 100));
        let mut model = GaussianModel::from_seed(&config, &seed).unwrap();
        let mut frame = seed.clone();
        for y in 0..7 {
            for x in 0..11 {
                if (x + y) % 4 == 0 {
                    frame.set(x as i64, y as i64, Pixel::new(250, 10, 10));
                }
            }
        }
        let warmup_mask = model.classify(&frame).unwrap();
        model.update(&warmup_mask, &frame).unwrap();

        let sequential = model.classify(&frame).unwrap();
        let parallel = model.classify_parallel(&frame, &Executor::new(4)).unwrap();
        assert_eq!(sequential, parallel);

        let bg_sequential = model.synthesise_background().unwrap();
        let bg_parallel = model
            .synthesise_background_parallel(&Executor::new(4))
            .unwrap();
        assert_eq!(bg_sequential, bg_parallel);
    }
}
