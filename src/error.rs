use thiserror::Error;

//////////////////////////
// Configuration errors //
//////////////////////////

/// Fatal configuration errors, raised before any epoch executes
///
/// Numeric edge cases (coincident points, vanishing denominators) are never
/// errors; the kernels substitute defined coefficients instead.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("edge arrays have mismatched lengths: head {head}, tail {tail}, epochs_per_sample {epochs_per_sample}")]
    EdgeLengthMismatch {
        head: usize,
        tail: usize,
        epochs_per_sample: usize,
    },

    #[error("vertex index {index} out of bounds for {n_vertices} vertices")]
    VertexOutOfBounds { index: usize, n_vertices: usize },

    #[error("head and tail embeddings have different dimensionality: {head_dim} vs {tail_dim}")]
    DimMismatch { head_dim: usize, tail_dim: usize },

    #[error("1-d pin mask has length {got}, expected one weight per point ({expected})")]
    PinMaskLength { got: usize, expected: usize },

    #[error("2-d pin mask has shape ({rows}, {cols}), expected embedding shape ({n_points}, {n_dim})")]
    PinMaskShape {
        rows: usize,
        cols: usize,
        n_points: usize,
        n_dim: usize,
    },

    #[error("array `{name}` has length {got}, expected {expected}")]
    ArrayLength {
        name: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("densMAP array `{name}` has length {got}, expected {expected}")]
    DensMapArrayLength {
        name: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("aligned inputs have {embeddings} embeddings but {other} entries in `{name}`")]
    AlignedLengthMismatch {
        embeddings: usize,
        other: usize,
        name: &'static str,
    },

    #[error("relation tensor window has even width {width}; expected 2 * window_size + 1")]
    RelationWindowShape { width: usize },
}
