pub mod error;
pub mod kmeans;

pub use error::{KMeansError, Result as KMeansResult};
pub use kmeans::{masked_mse, Convergence, InitBounds, MaskedKMeans, TieBreak};

use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use ndarray::Array2;
use std::fs::File;
use std::path::Path;

/// A numerical table with a per-cell observed/missing mask, loaded from TSV
#[derive(Debug, Clone)]
pub struct MaskedDataSet {
    pub data: Array2<f64>,
    pub mask: Array2<bool>,
    pub headers: Option<Vec<String>>,
}

impl MaskedDataSet {
    /// Read a TSV file into a MaskedDataSet.
    ///
    /// Empty, `NA`, `NaN` and otherwise unparsable cells are missing: they
    /// are stored as 0.0 with a `false` mask.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .map_err(|e| anyhow!("Failed to open {:?}: {}", path.as_ref(), e))?;

        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(file);

        let headers = rdr.headers()
            .ok()
            .map(|h| h.iter().map(|s| s.to_string()).collect::<Vec<_>>());

        let mut values: Vec<f64> = Vec::new();
        let mut observed: Vec<bool> = Vec::new();
        let mut nrows = 0;

        for (i, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| anyhow!("Error reading record {}: {}", i, e))?;
            for field in record.iter() {
                let (value, seen) = parse_cell(field);
                values.push(value);
                observed.push(seen);
            }
            nrows += 1;
        }

        if nrows == 0 {
            return Err(anyhow!("No data lines found in {:?}", path.as_ref()));
        }

        let ncols = values.len() / nrows;
        let data = Array2::from_shape_vec((nrows, ncols), values)?;
        let mask = Array2::from_shape_vec((nrows, ncols), observed)?;

        Ok(Self { data, mask, headers })
    }

    /// Fraction of cells that are observed
    pub fn observed_fraction(&self) -> f64 {
        if self.mask.is_empty() {
            return 0.0;
        }
        self.mask.iter().filter(|&&o| o).count() as f64 / self.mask.len() as f64
    }

    /// Set up a clustering session over this table
    pub fn kmeans(&self, k: i64) -> Result<MaskedKMeans> {
        MaskedKMeans::new(self.data.clone(), self.mask.clone(), k)
            .context("Failed to set up the clustering")
    }

    /// Write the centroids of a finished session as TSV; masked-off values become `NA`
    pub fn write_centroids<P: AsRef<Path>>(&self, path: P, km: &MaskedKMeans) -> Result<()> {
        let mut wtr = WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(&path)
            .with_context(|| format!("Failed to create {:?}", path.as_ref()))?;

        let mut header = vec!["cluster".to_string()];
        match &self.headers {
            Some(h) => header.extend(h.iter().cloned()),
            None => header.extend((0..km.n_coordinates()).map(|j| format!("V{}", j + 1))),
        }
        wtr.write_record(&header)?;

        for (c, (values, mask)) in km
            .centroids()
            .outer_iter()
            .zip(km.centroid_mask().outer_iter())
            .enumerate()
        {
            let mut row = vec![c.to_string()];
            row.extend(values.iter().zip(mask.iter()).map(|(v, &o)| {
                if o { v.to_string() } else { "NA".to_string() }
            }));
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn parse_cell(field: &str) -> (f64, bool) {
    match field.parse::<f64>() {
        Ok(v) if v.is_finite() => (v, true),
        _ => (0.0, false),
    }
}

/// Render cluster labels one per line, `NA` for points never assigned
pub fn format_assignments(assignments: &[Option<usize>]) -> String {
    assignments
        .iter()
        .map(|c| c.map_or_else(|| "NA".to_string(), |c| c.to_string()))
        .collect::<Vec<_>>()
        .join("\n")
}
