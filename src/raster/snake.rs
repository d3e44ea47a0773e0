use crate::calibration::GridCell;

/// Boustrophedon order over a `rows x cols` grid.
///
/// Even rows run left to right, odd rows right to left, so consecutive
/// cells are always neighbours.
pub fn snake_order(rows: usize, cols: usize) -> impl Iterator<Item = GridCell> {
    (0..rows).flat_map(move |row| {
        (0..cols).map(move |step| {
            let col = if row % 2 == 1 { cols - 1 - step } else { step };
            GridCell::new(row, col)
        })
    })
}
