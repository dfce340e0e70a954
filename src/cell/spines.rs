use rand::Rng;
use tracing::debug;

use super::{Cell, SectionSpec};
use crate::error::ModelResult;
use crate::filter::Filter;
use crate::wrappers::{Sec, Seg, Spine};

const HEAD_DIAM: f64 = 1.0;
const HEAD_LENGTH: f64 = 1.0;
const NECK_DIAM: f64 = 0.5;
const NECK_LENGTH: f64 = 0.5;

impl Cell {
    /// Creates `head[i]` and `neck[i]` with the head on the neck tip.
    fn new_spine(&self, head_nseg: usize, neck_nseg: usize) -> ModelResult<Spine> {
        let i = self.next_number("spine")?;
        let head = self.add_sec(
            SectionSpec::new(format!("head[{i}]"))
                .diam(HEAD_DIAM)
                .length(HEAD_LENGTH)
                .nseg(head_nseg),
        )?;
        let neck = self.add_sec(
            SectionSpec::new(format!("neck[{i}]"))
                .diam(NECK_DIAM)
                .length(NECK_LENGTH)
                .nseg(neck_nseg),
        )?;
        self.connect_secs(&head, &neck, 0.0, 1.0)?;
        let spine = Spine::new(format!("spine[{i}]"), head, neck);
        self.push(|p| &mut p.spines, spine.clone())?;
        Ok(spine)
    }

    /// Adds one spine on each of `segs`, the neck base at the segment.
    pub fn add_spines(
        &self,
        segs: &[Seg],
        head_nseg: usize,
        neck_nseg: usize,
    ) -> ModelResult<Vec<Spine>> {
        let mut spines = Vec::with_capacity(segs.len());
        for seg in segs {
            let spine = self.new_spine(head_nseg, neck_nseg)?;
            self.connect_secs(&spine.neck()?, seg.sec(), 0.0, seg.x())?;
            spines.push(spine);
        }
        debug!(cell = %self.name(), spines = spines.len(), "spines added");
        Ok(spines)
    }

    /// Adds `number` spines at locations drawn uniformly along the total
    /// length of `secs`. A seed re-seeds the context RNG first.
    pub fn make_spines(
        &self,
        number: usize,
        secs: &[Sec],
        head_nseg: usize,
        neck_nseg: usize,
        seed: Option<u64>,
    ) -> ModelResult<Vec<Spine>> {
        if let Some(seed) = seed {
            self.ctx().set_seed(seed);
        }
        // snapshot: new necks and heads must not become candidates
        let targets: Vec<(Sec, f64)> = secs
            .iter()
            .map(|s| -> ModelResult<(Sec, f64)> { Ok((s.clone(), s.props()?.length)) })
            .collect::<ModelResult<_>>()?;
        let total: f64 = targets.iter().map(|(_, l)| l).sum();

        let mut spines = Vec::with_capacity(number);
        for _ in 0..number {
            let spine = self.new_spine(head_nseg, neck_nseg)?;
            if total > 0.0 {
                let at = self.ctx().rng().gen::<f64>() * total;
                let mut start = 0.0;
                for (sec, length) in &targets {
                    if start + length > at {
                        let loc = ((at - start) / length).clamp(0.0, 1.0);
                        self.connect_secs(&spine.neck()?, sec, 0.0, loc)?;
                        break;
                    }
                    start += length;
                }
            }
            spines.push(spine);
        }
        debug!(cell = %self.name(), spines = spines.len(), "random spines added");
        Ok(spines)
    }

    /// Live spines in creation order.
    pub fn spines(&self) -> ModelResult<Vec<Spine>> {
        self.live(|p| &mut p.spines)
    }

    /// Spines matching `filter`.
    pub fn filter_spines(&self, filter: &Filter<Spine>) -> ModelResult<Vec<Spine>> {
        self.filter_in("spines", |p| &mut p.spines, filter)
    }

    /// Removes the spines matching `filter` with their sections.
    pub fn remove_spines(&self, filter: &Filter<Spine>) -> ModelResult<usize> {
        self.remove_in("spines", |p| &mut p.spines, filter)
    }
}
