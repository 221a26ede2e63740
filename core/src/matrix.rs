use crate::error::{PipelineError, Result};
use crate::ids::Idx;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// One non-zero cell of the feature matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TfIdfEntry {
    pub row: Idx,
    pub col: Idx,
    pub weight: f32,
}

/// What to do when the same (row, col) cell is pushed twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail the build; a term appears once per document in a well-formed archive.
    #[default]
    Reject,
    /// Add the weights.
    Sum,
    /// Keep the most recent weight.
    LastWins,
}

/// Compressed sparse row matrix with `f32` values. Columns are sorted within a row.
///
/// Deserialization checks the CSR layout, so a loaded matrix never indexes
/// out of bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CsrParts", into = "CsrParts")]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<Idx>,
    data: Vec<f32>,
}

/// On-disk form of [`CsrMatrix`].
#[derive(Serialize, Deserialize)]
struct CsrParts {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<Idx>,
    data: Vec<f32>,
}

impl From<CsrMatrix> for CsrParts {
    fn from(m: CsrMatrix) -> Self {
        Self { n_rows: m.n_rows, n_cols: m.n_cols, indptr: m.indptr, indices: m.indices, data: m.data }
    }
}

impl TryFrom<CsrParts> for CsrMatrix {
    type Error = PipelineError;

    fn try_from(p: CsrParts) -> Result<Self> {
        let bad = |msg: String| PipelineError::ShapeMismatch(format!("corrupt matrix: {msg}"));
        if p.indptr.len() != p.n_rows + 1 {
            return Err(bad(format!("{} row pointers for {} rows", p.indptr.len(), p.n_rows)));
        }
        if p.indices.len() != p.data.len() {
            return Err(bad(format!("{} column indices for {} values", p.indices.len(), p.data.len())));
        }
        if p.indptr[0] != 0 || p.indptr[p.n_rows] != p.data.len() {
            return Err(bad(format!("row pointers do not span 0..{}", p.data.len())));
        }
        for (i, w) in p.indptr.windows(2).enumerate() {
            if w[0] > w[1] || w[1] > p.data.len() {
                return Err(bad(format!("row pointer {} out of order", i + 1)));
            }
            let cols = &p.indices[w[0]..w[1]];
            if cols.iter().any(|&c| c as usize >= p.n_cols) {
                return Err(bad(format!("row {i} has a column outside 0..{}", p.n_cols)));
            }
            if cols.windows(2).any(|c| c[0] >= c[1]) {
                return Err(bad(format!("row {i} columns are not strictly increasing")));
            }
        }
        Ok(Self { n_rows: p.n_rows, n_cols: p.n_cols, indptr: p.indptr, indices: p.indices, data: p.data })
    }
}

/// Borrowed view of one matrix row.
#[derive(Debug, Clone, Copy)]
pub struct SparseRow<'a> {
    pub indices: &'a [Idx],
    pub values: &'a [f32],
}

impl<'a> SparseRow<'a> {
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn get(&self, col: Idx) -> f32 {
        match self.indices.binary_search(&col) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Dot product with a dense vector indexed by column.
    pub fn dot(&self, dense: &[f32]) -> f32 {
        self.indices
            .iter()
            .zip(self.values)
            .map(|(&c, &v)| dense.get(c as usize).copied().unwrap_or(0.0) * v)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Idx, f32)> + 'a {
        let (indices, values) = (self.indices, self.values);
        indices.iter().copied().zip(values.iter().copied())
    }
}

impl CsrMatrix {
    /// An all-zero matrix.
    pub fn zeros(n_rows: usize, n_cols: usize) -> Self {
        Self {
            n_rows,
            n_cols,
            indptr: vec![0; n_rows + 1],
            indices: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Builds a matrix from per-row `(col, value)` lists; columns must be in range.
    pub fn from_rows(n_cols: usize, rows: Vec<Vec<(Idx, f32)>>) -> Result<Self> {
        let mut m = Self::zeros(0, n_cols);
        m.indptr.clear();
        m.indptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(c, _)| c);
            for (c, v) in row {
                if c as usize >= n_cols {
                    return Err(PipelineError::IndexOutOfRange { axis: "column", index: c as u64, size: n_cols });
                }
                m.indices.push(c);
                m.data.push(v);
            }
            m.indptr.push(m.indices.len());
            m.n_rows += 1;
        }
        Ok(m)
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn row(&self, i: usize) -> SparseRow<'_> {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        SparseRow { indices: &self.indices[start..end], values: &self.data[start..end] }
    }

    pub fn rows(&self) -> impl Iterator<Item = SparseRow<'_>> + '_ {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    /// New matrix made of the given rows, in the given order (repeats allowed).
    pub fn select_rows(&self, rows: &[Idx]) -> Result<CsrMatrix> {
        let mut out = Self::zeros(0, self.n_cols);
        out.indptr.clear();
        out.indptr.push(0);
        for &r in rows {
            if r as usize >= self.n_rows {
                return Err(PipelineError::IndexOutOfRange { axis: "row", index: r as u64, size: self.n_rows });
            }
            let row = self.row(r as usize);
            out.indices.extend_from_slice(row.indices);
            out.data.extend_from_slice(row.values);
            out.indptr.push(out.indices.len());
            out.n_rows += 1;
        }
        Ok(out)
    }

    /// Scales every row to unit L2 norm; all-zero rows are left as they are.
    pub fn normalize_rows(&mut self) {
        for i in 0..self.n_rows {
            let (start, end) = (self.indptr[i], self.indptr[i + 1]);
            let norm = self.data[start..end].iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in &mut self.data[start..end] {
                    *v /= norm;
                }
            }
        }
    }
}

/// Accumulates [`TfIdfEntry`] cells and produces a row-normalized [`CsrMatrix`].
pub struct MatrixAssembler {
    n_rows: usize,
    n_cols: usize,
    policy: DuplicatePolicy,
    cells: HashMap<(Idx, Idx), f32>,
}

impl MatrixAssembler {
    pub fn new(n_rows: usize, n_cols: usize, policy: DuplicatePolicy) -> Self {
        Self { n_rows, n_cols, policy, cells: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn push(&mut self, entry: TfIdfEntry) -> Result<()> {
        if entry.row as usize >= self.n_rows {
            return Err(PipelineError::IndexOutOfRange { axis: "row", index: entry.row as u64, size: self.n_rows });
        }
        if entry.col as usize >= self.n_cols {
            return Err(PipelineError::IndexOutOfRange { axis: "column", index: entry.col as u64, size: self.n_cols });
        }
        match self.cells.entry((entry.row, entry.col)) {
            Entry::Vacant(slot) => {
                slot.insert(entry.weight);
            }
            Entry::Occupied(mut slot) => match self.policy {
                DuplicatePolicy::Reject => {
                    return Err(PipelineError::DuplicateEntry { row: entry.row, col: entry.col })
                }
                DuplicatePolicy::Sum => *slot.get_mut() += entry.weight,
                DuplicatePolicy::LastWins => {
                    slot.insert(entry.weight);
                }
            },
        }
        Ok(())
    }

    pub fn extend<I: IntoIterator<Item = TfIdfEntry>>(&mut self, entries: I) -> Result<()> {
        for entry in entries {
            self.push(entry)?;
        }
        Ok(())
    }

    pub fn finish(self) -> CsrMatrix {
        let mut rows: Vec<Vec<(Idx, f32)>> = vec![Vec::new(); self.n_rows];
        for ((r, c), v) in self.cells {
            rows[r as usize].push((c, v));
        }
        let mut m = CsrMatrix::zeros(self.n_rows, self.n_cols);
        m.indptr.clear();
        m.indptr.push(0);
        for mut row in rows {
            row.sort_unstable_by_key(|&(c, _)| c);
            for (c, v) in row {
                m.indices.push(c);
                m.data.push(v);
            }
            m.indptr.push(m.indices.len());
        }
        m.normalize_rows();
        m
    }
}

/// Builds the normalized feature matrix of shape `(n_rows, n_cols)` from `entries`.
pub fn assemble<I: IntoIterator<Item = TfIdfEntry>>(
    entries: I,
    n_rows: usize,
    n_cols: usize,
    policy: DuplicatePolicy,
) -> Result<CsrMatrix> {
    let mut assembler = MatrixAssembler::new(n_rows, n_cols, policy);
    assembler.extend(entries)?;
    Ok(assembler.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(row: Idx, col: Idx, weight: f32) -> TfIdfEntry {
        TfIdfEntry { row, col, weight }
    }

    #[test]
    fn single_weight_normalizes_to_one() {
        let m = assemble([e(0, 5, 0.8), e(1, 5, 0.6)], 2, 6, DuplicatePolicy::Reject).unwrap();
        assert_eq!(m.shape(), (2, 6));
        assert_eq!(m.row(0).indices, &[5]);
        assert!((m.row(0).get(5) - 1.0).abs() < 1e-6);
        assert!((m.row(1).get(5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rows_have_unit_norm_and_empty_rows_stay_zero() {
        let m = assemble([e(0, 0, 3.0), e(0, 2, 4.0), e(2, 1, 0.1)], 3, 3, DuplicatePolicy::Reject).unwrap();
        assert!((m.row(0).norm() - 1.0).abs() < 1e-6);
        assert!((m.row(0).get(2) - 0.8).abs() < 1e-6);
        assert_eq!(m.row(1).nnz(), 0);
        assert_eq!(m.row(1).norm(), 0.0);
        assert!((m.row(2).norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_cell_is_an_error() {
        let err = assemble([e(2, 0, 1.0)], 2, 2, DuplicatePolicy::Reject).unwrap_err();
        assert!(matches!(err, PipelineError::IndexOutOfRange { axis: "row", index: 2, size: 2 }));
        let err = assemble([e(0, 9, 1.0)], 2, 2, DuplicatePolicy::Reject).unwrap_err();
        assert!(matches!(err, PipelineError::IndexOutOfRange { axis: "column", .. }));
    }

    #[test]
    fn duplicate_policies() {
        let cells = [e(0, 0, 1.0), e(0, 1, 1.0), e(0, 0, 2.0)];
        let err = assemble(cells, 1, 2, DuplicatePolicy::Reject).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateEntry { row: 0, col: 0 }));

        let last = assemble(cells, 1, 2, DuplicatePolicy::LastWins).unwrap();
        let norm = (4.0f32 + 1.0).sqrt();
        assert!((last.row(0).get(0) - 2.0 / norm).abs() < 1e-6);

        let sum = assemble(cells, 1, 2, DuplicatePolicy::Sum).unwrap();
        let norm = (9.0f32 + 1.0).sqrt();
        assert!((sum.row(0).get(0) - 3.0 / norm).abs() < 1e-6);
    }

    #[test]
    fn corrupt_layouts_fail_to_load() {
        let m = assemble([e(0, 0, 1.0), e(1, 2, 1.0)], 2, 3, DuplicatePolicy::Reject).unwrap();
        let bytes = bincode::serialize(&m).unwrap();
        assert_eq!(bincode::deserialize::<CsrMatrix>(&bytes).unwrap(), m);
        assert!(bincode::deserialize::<CsrMatrix>(&bytes[..bytes.len() - 3]).is_err());

        let parts = |indptr: Vec<usize>, indices: Vec<Idx>, data: Vec<f32>| {
            bincode::serialize(&CsrParts { n_rows: 2, n_cols: 3, indptr, indices, data }).unwrap()
        };
        let corrupt = [
            parts(vec![0, 1], vec![0], vec![1.0]),
            parts(vec![0, 1, 5], vec![0, 2], vec![1.0, 1.0]),
            parts(vec![0, 2, 1], vec![0, 2], vec![1.0, 1.0]),
            parts(vec![0, 1, 2], vec![0, 7], vec![1.0, 1.0]),
            parts(vec![0, 2, 2], vec![2, 0], vec![1.0, 1.0]),
            parts(vec![0, 1, 2], vec![0, 2], vec![1.0]),
            parts(vec![0, 5, 2], vec![0, 2], vec![1.0, 1.0]),
        ];
        for bytes in &corrupt {
            assert!(bincode::deserialize::<CsrMatrix>(bytes).is_err());
        }
    }

    #[test]
    fn select_rows_keeps_requested_order() {
        let m = assemble([e(0, 0, 1.0), e(1, 1, 1.0), e(2, 2, 1.0)], 3, 3, DuplicatePolicy::Reject).unwrap();
        let s = m.select_rows(&[2, 0, 2]).unwrap();
        assert_eq!(s.shape(), (3, 3));
        assert_eq!(s.row(0).indices, &[2]);
        assert_eq!(s.row(1).indices, &[0]);
        assert_eq!(s.row(2).indices, &[2]);
        assert!(m.select_rows(&[3]).is_err());
    }
}
