//! K-means over partially observed data.
//!
//! Every data point carries a mask of observed coordinates. Distances are
//! computed over the coordinates observed in both the point and the
//! centroid, and centroids themselves carry a mask: a coordinate that none
//! of a centroid's members observe is switched off for that centroid.
//!
//! The loop is plain Lloyd iteration:
//!
//! 1. [`MaskedKMeans::initialise`] places K centroids uniformly inside the
//!    per-column value range.
//! 2. [`MaskedKMeans::assign`] moves every point to its closest centroid.
//! 3. [`MaskedKMeans::update`] recomputes every centroid as the mean of the
//!    observed member values.
//! 4. Repeat until an assignment step changes nothing.

use crate::error::{KMeansError, Result};
use log::{debug, info, warn};
use ndarray::{Array, Array2, ArrayView1, ArrayView2, Axis, Dimension, Ix2};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Mean squared difference over the coordinates observed in both operands.
///
/// Returns `None` when the two masks share no observed coordinate. That is
/// an undefined distance, not a zero one.
pub fn masked_mse(
    point: ArrayView1<'_, f64>,
    centroid: ArrayView1<'_, f64>,
    point_mask: ArrayView1<'_, bool>,
    centroid_mask: ArrayView1<'_, bool>,
) -> Option<f64> {
    debug_assert_eq!(point.len(), centroid.len());
    debug_assert_eq!(point.len(), point_mask.len());
    debug_assert_eq!(point.len(), centroid_mask.len());
    let mut sum = 0.0;
    let mut overlap = 0usize;
    for (((x, c), &mx), &mc) in point
        .iter()
        .zip(centroid.iter())
        .zip(point_mask.iter())
        .zip(centroid_mask.iter())
    {
        if mx && mc {
            sum += (x - c).powi(2);
            overlap += 1;
        }
    }
    if overlap == 0 {
        None
    } else {
        Some(sum / overlap as f64)
    }
}

/// How the assignment step picks the closest centroid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Centroid 0 is always the tentative best. A later centroid takes over
    /// whenever either the current best or the new distance is undefined or
    /// exactly zero, or the new distance is smaller. An undefined distance
    /// can thereby displace a defined minimum.
    #[default]
    Literal,
    /// Undefined distances never displace a defined one and zero is an
    /// ordinary distance. If every distance is undefined, centroid 0 wins.
    Strict,
}

impl TieBreak {
    /// Whether `candidate` should replace `best` for any centroid after the first.
    fn prefers(self, best: Option<f64>, candidate: Option<f64>) -> bool {
        match self {
            TieBreak::Literal => {
                let falsy = |d: Option<f64>| d.map_or(true, |v| v == 0.0);
                falsy(best)
                    || falsy(candidate)
                    || matches!((best, candidate), (Some(b), Some(c)) if c < b)
            }
            TieBreak::Strict => match (best, candidate) {
                (_, None) => false,
                (None, Some(_)) => true,
                (Some(b), Some(c)) => c < b,
            },
        }
    }
}

/// Which values bound the random centroid placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitBounds {
    /// Column minimum and maximum over every stored value, observed or not.
    #[default]
    AllValues,
    /// Column minimum and maximum over observed values only.
    ObservedOnly,
}

/// Outcome of [`MaskedKMeans::cluster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Convergence {
    /// Number of assign/update rounds performed.
    pub iterations: usize,
    /// `false` if the iteration cap stopped the loop before a stable assignment.
    pub converged: bool,
}

/// A clustering session: the data, its mask and the evolving centroids.
#[derive(Debug, Clone)]
pub struct MaskedKMeans {
    x: Array2<f64>,
    m: Array2<bool>,
    k: usize,

    centroids: Array2<f64>,
    centroid_mask: Array2<bool>,
    assignments: Vec<Option<usize>>,
    members: Vec<Vec<usize>>,
    initialised: bool,

    tie_break: TieBreak,
    init_bounds: InitBounds,
    max_iter: Option<usize>,
}

impl MaskedKMeans {
    /// Validate the inputs and create a session.
    ///
    /// `x` must be two-dimensional, `m` must have exactly the same shape and
    /// `k` must be positive. Any array dimensionality is accepted so that a
    /// wrongly shaped input is reported as [`KMeansError::Shape`].
    pub fn new<Dx, Dm>(x: Array<f64, Dx>, m: Array<bool, Dm>, k: i64) -> Result<Self>
    where
        Dx: Dimension,
        Dm: Dimension,
    {
        if x.ndim() != 2 {
            return Err(KMeansError::Shape(format!(
                "input matrix X is not a two-dimensional array, but instead {}-dimensional",
                x.ndim()
            )));
        }
        if x.shape() != m.shape() {
            return Err(KMeansError::Shape(format!(
                "input matrix X is not of the same size as the mask M: {:?} and {:?} respectively",
                x.shape(),
                m.shape()
            )));
        }
        if k <= 0 {
            return Err(KMeansError::InvalidArgument {
                arg: "k",
                reason: format!("must be greater than 0, got {k}"),
            });
        }
        let k = usize::try_from(k).map_err(|_| KMeansError::InvalidArgument {
            arg: "k",
            reason: format!("{k} does not fit the address space"),
        })?;

        let x = x
            .into_dimensionality::<Ix2>()
            .map_err(|e| KMeansError::Shape(e.to_string()))?;
        let m = m
            .into_dimensionality::<Ix2>()
            .map_err(|e| KMeansError::Shape(e.to_string()))?;
        let (n, d) = x.dim();

        Ok(Self {
            x,
            m,
            k,
            centroids: Array2::zeros((k, d)),
            centroid_mask: Array2::from_elem((k, d), false),
            assignments: vec![None; n],
            members: vec![Vec::new(); k],
            initialised: false,
            tie_break: TieBreak::default(),
            init_bounds: InitBounds::default(),
            max_iter: None,
        })
    }

    /// Select the closest-centroid policy.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Select which values bound the random initial centroids.
    pub fn with_init_bounds(mut self, init_bounds: InitBounds) -> Self {
        self.init_bounds = init_bounds;
        self
    }

    /// Stop [`cluster`](Self::cluster) after at most `max_iter` rounds.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = Some(max_iter);
        self
    }

    pub fn n_points(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_coordinates(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_clusters(&self) -> usize {
        self.k
    }

    /// K×D centroid values.
    pub fn centroids(&self) -> ArrayView2<'_, f64> {
        self.centroids.view()
    }

    /// K×D centroid masks; `false` where the centroid has no defined value.
    pub fn centroid_mask(&self) -> ArrayView2<'_, bool> {
        self.centroid_mask.view()
    }

    /// Current cluster of every point, `None` before the first assignment.
    pub fn assignments(&self) -> &[Option<usize>] {
        &self.assignments
    }

    /// Point indices per centroid, as built by the last assignment step.
    pub fn members(&self) -> &[Vec<usize>] {
        &self.members
    }

    /// Place K random centroids and reset all assignments.
    ///
    /// With a seed the placement is reproducible. Calling this again
    /// replaces every piece of previous state.
    pub fn initialise(&mut self, seed: Option<u64>) {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let bounds = self.column_bounds();

        let mut centroids = Array2::<f64>::zeros((self.k, self.n_coordinates()));
        for mut row in centroids.rows_mut() {
            for (value, &(lo, hi)) in row.iter_mut().zip(bounds.iter()) {
                // convex combination, hi - lo can overflow for finite bounds
                let t: f64 = rng.gen();
                *value = (lo * (1.0 - t) + hi * t).clamp(lo, hi);
            }
        }

        self.centroids = centroids;
        self.centroid_mask = Array2::from_elem((self.k, self.n_coordinates()), true);
        self.assignments = vec![None; self.n_points()];
        self.members = vec![Vec::new(); self.k];
        self.initialised = true;
        debug!(
            "initialised {} centroids over {} coordinates (seed {:?})",
            self.k,
            self.n_coordinates(),
            seed
        );
    }

    /// Use the given centroids instead of random ones.
    ///
    /// Both matrices must be K×D. Assignments are reset to unassigned.
    pub fn set_centroids(&mut self, centroids: Array2<f64>, mask: Array2<bool>) -> Result<()> {
        let expected = (self.k, self.n_coordinates());
        if centroids.dim() != expected || mask.dim() != expected {
            return Err(KMeansError::Shape(format!(
                "centroids must be {:?}, got values {:?} and mask {:?}",
                expected,
                centroids.dim(),
                mask.dim()
            )));
        }
        self.centroids = centroids;
        self.centroid_mask = mask;
        self.assignments = vec![None; self.n_points()];
        self.members = vec![Vec::new(); self.k];
        self.initialised = true;
        Ok(())
    }

    // (min, max) per column; non-finite values never count
    fn column_bounds(&self) -> Vec<(f64, f64)> {
        let all = self.init_bounds == InitBounds::AllValues;
        self.x
            .axis_iter(Axis(1))
            .zip(self.m.axis_iter(Axis(1)))
            .map(|(column, observed)| {
                let (lo, hi) = column
                    .iter()
                    .zip(observed.iter())
                    .filter(|(v, o)| v.is_finite() && (all || **o))
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (v, _)| {
                        (lo.min(*v), hi.max(*v))
                    });
                if lo > hi {
                    (0.0, 0.0)
                } else {
                    (lo, hi)
                }
            })
            .collect()
    }

    fn closest_centroid(&self, point: usize) -> usize {
        let x = self.x.row(point);
        let mx = self.m.row(point);

        let mut best_index = 0;
        let mut best_mse = None;
        for c in 0..self.k {
            let mse = masked_mse(x, self.centroids.row(c), mx, self.centroid_mask.row(c));
            if c == 0 || self.tie_break.prefers(best_mse, mse) {
                best_mse = mse;
                best_index = c;
            }
        }
        best_index
    }

    /// Assign every point to its closest centroid.
    ///
    /// Rebuilds the membership lists from scratch and returns `true` if any
    /// point ended up in a different cluster than before.
    pub fn assign(&mut self) -> bool {
        let mut members = vec![Vec::new(); self.k];
        let mut changed = false;

        for i in 0..self.n_points() {
            let c = self.closest_centroid(i);
            changed |= self.assignments[i] != Some(c);
            self.assignments[i] = Some(c);
            members[c].push(i);
        }

        self.members = members;
        changed
    }

    /// Move every centroid to the mean of its members' observed values.
    ///
    /// Each coordinate is handled on its own: if no member observes it, the
    /// centroid's value there becomes 0 and its mask `false`. A centroid
    /// without members is therefore masked off entirely.
    pub fn update(&mut self) {
        for c in 0..self.k {
            if self.members[c].is_empty() {
                warn!("centroid {c} has no assigned points; masking all coordinates");
            }
            for j in 0..self.n_coordinates() {
                let (sum, count) = self.members[c]
                    .iter()
                    .filter(|&&i| self.m[[i, j]])
                    .fold((0.0, 0usize), |(sum, count), &i| {
                        (sum + self.x[[i, j]], count + 1)
                    });

                if count == 0 {
                    self.centroids[[c, j]] = 0.0;
                    self.centroid_mask[[c, j]] = false;
                } else {
                    self.centroids[[c, j]] = sum / count as f64;
                    self.centroid_mask[[c, j]] = true;
                }
            }
        }
    }

    /// Sum of masked MSEs between each assigned point and its centroid.
    ///
    /// Points without a defined distance to their centroid contribute nothing.
    pub fn inertia(&self) -> f64 {
        self.assignments
            .iter()
            .enumerate()
            .filter_map(|(i, c)| {
                let c = (*c)?;
                masked_mse(
                    self.x.row(i),
                    self.centroids.row(c),
                    self.m.row(i),
                    self.centroid_mask.row(c),
                )
            })
            .sum()
    }

    /// Alternate assignment and update until no point changes cluster.
    pub fn cluster(&mut self) -> Result<Convergence> {
        if !self.initialised {
            return Err(KMeansError::NotInitialised);
        }

        let mut iterations = 0;
        loop {
            if let Some(max_iter) = self.max_iter {
                if iterations >= max_iter {
                    warn!("stopped after {iterations} iterations without a stable assignment");
                    return Ok(Convergence {
                        iterations,
                        converged: false,
                    });
                }
            }

            let changed = self.assign();
            self.update();
            iterations += 1;
            debug!(
                "iteration {iterations}: changed = {changed}, inertia = {}",
                self.inertia()
            );

            if !changed {
                info!("converged after {iterations} iterations");
                return Ok(Convergence {
                    iterations,
                    converged: true,
                });
            }
        }
    }
}
