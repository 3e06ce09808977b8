//! Cursor addressing.
//!
//! Displays with up to four rows report as a 2×40 controller: rows 0 and 1 are the two physical
//! lines, rows 2 and 3 continue them 20 characters later.

/// "Set DDRAM address" commands for column 0 of each row.
pub const ROW_START: [u8; 4] = [0x80, 0xC0, 0x94, 0xD4];

/// Gets the command moving the cursor to `row`, `column`.
///
/// Returns `None` for rows outside 0–3. The column is not checked, an address past the end of the
/// row simply lands in the next row or wraps around the DDRAM.
pub fn position_command(row: u8, column: u8) -> Option<u8> {
    ROW_START
        .get(row as usize)
        .map(|start| start.wrapping_add(column))
}
