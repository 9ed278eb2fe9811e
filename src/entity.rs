// SPDX-License-Identifier: GPL-3.0-or-later
//! Connected-component labelling over a binary foreground mask, plus
//! geometric filtering of the discovered entities.
use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::config::EntityFilterConfig;
use crate::image::{Image, Pixel};

/// A single 4-connected component of foreground pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub id: u8,
    pub mass: u32,
    pub min_x: u32,
    pub max_x: u32,
    pub min_y: u32,
    pub max_y: u32,
}

impl Entity {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }
}

/// Bounds on an entity's geometry; any bound set to `-1` disables that
/// check.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EntityFilter {
    pub min_mass: i64,
    pub max_mass: i64,
    pub min_width: i64,
    pub max_width: i64,
    pub min_height: i64,
    pub max_height: i64,
}

impl From<EntityFilterConfig> for EntityFilter {
    fn from(config: EntityFilterConfig) -> Self {
        Self {
            min_mass: config.min_mass,
            max_mass: config.max_mass,
            min_width: config.min_width,
            max_width: config.max_width,
            min_height: config.min_height,
            max_height: config.max_height,
        }
    }
}

impl EntityFilter {
    /// Every bound passes unless it is set to something other than `-1` and
    /// the entity's corresponding value violates it.
    pub fn passes(&self, entity: &Entity) -> bool {
        bound_ok(self.min_mass, entity.mass as i64, true)
            && bound_ok(self.max_mass, entity.mass as i64, false)
            && bound_ok(self.min_width, entity.width() as i64, true)
            && bound_ok(self.max_width, entity.width() as i64, false)
            && bound_ok(self.min_height, entity.height() as i64, true)
            && bound_ok(self.max_height, entity.height() as i64, false)
    }
}

fn bound_ok(bound: i64, value: i64, is_lower: bool) -> bool {
    if bound == -1 {
        return true;
    }
    if is_lower {
        value >= bound
    } else {
        value <= bound
    }
}

/// The four neighbour offsets explored by the flood fill, in the order the
/// specification mandates as the queue's tie-break: right, down, left, up.
const NEIGHBOUR_OFFSETS: [(i32, i32); 4] = [(1, 0), (0, 1), (-1, 0), (0, -1)];

/// Finds and optionally filters 4-connected components of foreground
/// pixels in a binary mask.
#[derive(Copy, Clone, Debug, Default)]
pub struct EntityAnalyzer;

impl EntityAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Scan `mask` in row-major order; every encountered foreground pixel
    /// seeds a BFS flood fill (4-connectivity, right/down/left/up expansion
    /// order) that retags its component to `(id, id, id)`. Returns the
    /// discovered entities in discovery order.
    pub fn find_entities(&self, mask: &mut Image) -> Vec<Entity> {
        let (entities, _) = self.label(mask);
        debug!(count = entities.len(), "found entities");
        entities
    }

    /// Like [`Self::find_entities`], but every labelled entity is tested
    /// against `filter`; entities that fail are retagged back to
    /// background. When `preserve_tagging` is false, every surviving
    /// entity's pixels are rewritten to pure white once filtering is
    /// complete, restoring a binary mask.
    pub fn filter_entities(
        &self,
        mask: &mut Image,
        filter: &EntityFilter,
        preserve_tagging: bool,
    ) -> Vec<Entity> {
        let (entities, starts) = self.label(mask);
        let mut survivors = Vec::new();
        let mut next_id: u8 = 1;
        for (entity, start) in entities.into_iter().zip(starts.into_iter()) {
            if filter.passes(&entity) {
                let new_id = next_id;
                next_id = next_id.saturating_add(1);
                if new_id != entity.id {
                    retag(mask, start, entity.id, new_id);
                }
                survivors.push(Entity { id: new_id, ..entity });
            } else {
                erase_tag(mask, start, entity.id);
            }
        }
        if !preserve_tagging {
            whiten_survivors(mask, &survivors);
        }
        trace!(
            survivors = survivors.len(),
            preserve_tagging,
            "filtered entities"
        );
        survivors
    }

    /// Label every foreground component in `mask`, in row-major discovery
    /// order, retagging each to `(id, id, id)` as it is found. Returns the
    /// entities alongside the `(x, y)` each one's flood fill was seeded at.
    fn label(&self, mask: &mut Image) -> (Vec<Entity>, Vec<(u32, u32)>) {
        let width = mask.width();
        let height = mask.height();
        let mut entities = Vec::new();
        let mut starts = Vec::new();
        let mut next_id: u16 = 1;

        for y in 0..height {
            for x in 0..width {
                if !mask.get(x as i64, y as i64).is_foreground() {
                    continue;
                }
                // Ids saturate at 255 so a 256th component never collides
                // with the (0, 0, 0) background tag.
                let id = next_id.min(255) as u8;
                next_id = next_id.saturating_add(1);
                let entity = flood_fill(mask, x, y, id);
                entities.push(entity);
                starts.push((x, y));
            }
        }
        (entities, starts)
    }
}

/// BFS flood fill from `(start_x, start_y)`, retagging every visited pixel
/// to `(id, id, id)` and accumulating mass/bounding box.
fn flood_fill(mask: &mut Image, start_x: u32, start_y: u32, id: u8) -> Entity {
    let width = mask.width();
    let height = mask.height();
    let tag = Pixel::new(id, id, id);

    let mut queue = VecDeque::new();
    queue.push_back((start_x, start_y));
    mask.set(start_x as i64, start_y as i64, tag);

    let mut entity = Entity {
        id,
        mass: 0,
        min_x: start_x,
        max_x: start_x,
        min_y: start_y,
        max_y: start_y,
    };

    while let Some((x, y)) = queue.pop_front() {
        entity.mass += 1;
        entity.min_x = entity.min_x.min(x);
        entity.max_x = entity.max_x.max(x);
        entity.min_y = entity.min_y.min(y);
        entity.max_y = entity.max_y.max(y);

        for (dx, dy) in NEIGHBOUR_OFFSETS {
            let nx = x as i64 + dx as i64;
            let ny = y as i64 + dy as i64;
            if nx < 0 || ny < 0 || nx as u32 >= width || ny as u32 >= height {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if mask.get(nx as i64, ny as i64).is_foreground() {
                mask.set(nx as i64, ny as i64, tag);
                queue.push_back((nx, ny));
            }
        }
    }

    entity
}

/// Retag every pixel equal to `(id, id, id)`, reachable by 4-connectivity
/// from `start`, back to background. A second flood fill seeded at the
/// entity's own starting point, searching for its own tag colour.
fn erase_tag(mask: &mut Image, start: (u32, u32), id: u8) {
    retag(mask, start, id, 0);
}

/// Flood fill from `start`, rewriting every reachable pixel tagged
/// `(old_id, old_id, old_id)` to `(new_id, new_id, new_id)` (or to
/// background, when `new_id` is 0).
fn retag(mask: &mut Image, start: (u32, u32), old_id: u8, new_id: u8) {
    let width = mask.width();
    let height = mask.height();
    let old_tag = Pixel::new(old_id, old_id, old_id);
    let new_tag = if new_id == 0 {
        Pixel::BLACK
    } else {
        Pixel::new(new_id, new_id, new_id)
    };

    if mask.get(start.0 as i64, start.1 as i64) != old_tag {
        return;
    }

    let mut queue = VecDeque::new();
    queue.push_back(start);
    mask.set(start.0 as i64, start.1 as i64, new_tag);

    while let Some((x, y)) = queue.pop_front() {
        for (dx, dy) in NEIGHBOUR_OFFSETS {
            let nx = x as i64 + dx as i64;
            let ny = y as i64 + dy as i64;
            if nx < 0 || ny < 0 || nx as u32 >= width || ny as u32 >= height {
                continue;
            }
            let (nx, ny) = (nx as u32, ny as u32);
            if mask.get(nx as i64, ny as i64) == old_tag {
                mask.set(nx as i64, ny as i64, new_tag);
                queue.push_back((nx, ny));
            }
        }
    }
}

fn whiten_survivors(mask: &mut Image, survivors: &[Entity]) {
    let survivor_ids: Vec<u8> = survivors.iter().map(|e| e.id).collect();
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            let pixel = mask.get(x as i64, y as i64);
            if pixel.is_background() {
                continue;
            }
            if survivor_ids.contains(&pixel.r) {
                mask.set(x as i64, y as i64, Pixel::WHITE);
            }
        }
    }
}

/// A motion decision derived from the fraction of a mask's pixels that are
/// foreground, compared against a configured threshold.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MotionDecision {
    pub foreground_fraction: f32,
    pub motion_detected: bool,
}

/// The fraction of `mask`'s pixels that are foreground, compared against
/// `change_percent_threshold`.
pub fn foreground_fraction(mask: &Image, change_percent_threshold: f32) -> MotionDecision {
    let total = (mask.width() as u64 * mask.height() as u64).max(1) as f64;
    let foreground = mask.count_matching(Pixel::WHITE) as f64;
    let fraction = (foreground / total) as f32;
    MotionDecision {
        foreground_fraction: fraction,
        motion_detected: fraction > change_percent_threshold,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mask_with_foreground(width: u32, height: u32, points: &[(u32, u32)]) -> Image {
        let mut mask = Image::create(width, height).unwrap();
        for &(x, y) in points {
            mask.set(x as i64, y as i64, Pixel::WHITE);
        }
        mask
    }

    #[test]
    fn finds_two_entities() {
        let mut mask = mask_with_foreground(5, 5, &[(1, 1), (2, 1), (1, 2), (3, 3)]);
        let analyzer = EntityAnalyzer::new();
        let entities = analyzer.find_entities(&mut mask);
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].mass, 3);
        assert_eq!((entities[0].min_x, entities[0].max_x), (1, 2));
        assert_eq!((entities[0].min_y, entities[0].max_y), (1, 2));
        assert_eq!(entities[1].mass, 1);
        assert_eq!((entities[1].min_x, entities[1].max_x), (3, 3));
        assert_eq!((entities[1].min_y, entities[1].max_y), (3, 3));
    }

    #[test]
    fn filters_by_mass_and_whitens_survivors() {
        let mut mask = mask_with_foreground(5, 5, &[(1, 1), (2, 1), (1, 2), (3, 3)]);
        let filter = EntityFilter {
            min_mass: 2,
            max_mass: -1,
            min_width: -1,
            max_width: -1,
            min_height: -1,
            max_height: -1,
        };
        let analyzer = EntityAnalyzer::new();
        let survivors = analyzer.filter_entities(&mut mask, &filter, false);
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].mass, 3);
        assert_eq!(mask.count_matching(Pixel::WHITE), 3);
        assert_eq!(mask.count_matching(Pixel::BLACK), 25 - 3);
    }

    #[test]
    fn bounding_boxes_contain_every_labelled_pixel() {
        let mut mask = mask_with_foreground(
            6,
            6,
            &[(0, 0), (1, 0), (0, 1), (4, 4), (4, 5), (5, 5)],
        );
        let analyzer = EntityAnalyzer::new();
        let entities = analyzer.find_entities(&mut mask);
        for entity in &entities {
            assert!(entity.min_x <= entity.max_x);
            assert!(entity.min_y <= entity.max_y);
        }
    }

    #[test]
    fn passes_ignores_disabled_bounds() {
        let entity = Entity {
            id: 1,
            mass: 10,
            min_x: 0,
            max_x: 2,
            min_y: 0,
            max_y: 2,
        };
        let filter = EntityFilter {
            min_mass: -1,
            max_mass: -1,
            min_width: -1,
            max_width: -1,
            min_height: -1,
            max_height: -1,
        };
        assert!(filter.passes(&entity));
    }

    #[test]
    fn filter_sufficiency() {
        let mut mask = mask_with_foreground(5, 5, &[(1, 1), (2, 1), (1, 2), (3, 3)]);
        let filter = EntityFilter {
            min_mass: 2,
            max_mass: -1,
            min_width: -1,
            max_width: -1,
            min_height: -1,
            max_height: -1,
        };
        let analyzer = EntityAnalyzer::new();
        let mut unfiltered_mask = mask.clone();
        let all = analyzer.find_entities(&mut unfiltered_mask);
        let survivors = analyzer.filter_entities(&mut mask, &filter, true);
        for entity in &survivors {
            assert!(filter.passes(entity));
        }
        assert!(all.len() >= survivors.len());
    }

    #[test]
    fn foreground_fraction_compares_against_threshold() {
        let mut mask = Image::create(10, 10).unwrap();
        for x in 0..5 {
            mask.set(x, 0, Pixel::WHITE);
        }
        let below = foreground_fraction(&mask, 0.1);
        assert_eq!(below.foreground_fraction, 0.05);
        assert!(!below.motion_detected);

        let above = foreground_fraction(&mask, 0.01);
        assert!(above.motion_detected);
    }
}
