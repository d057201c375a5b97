//! Active-cell state machine
//!
//! Exactly one (row, property) pair holds input focus at a time. Focus and
//! navigation are resolved against a [`GridLayout`], the visible, filtered
//! and sorted rows plus the editable columns as the presentation layer
//! shows them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{property, PropertyMap, RowRef};

/// The cell currently accepting input
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActiveCell {
    pub row: RowRef,
    pub property_key: String,
}

impl ActiveCell {
    pub fn new(row: impl Into<RowRef>, property_key: impl Into<String>) -> Self {
        Self {
            row: row.into(),
            property_key: property_key.into(),
        }
    }
}

impl fmt::Display for ActiveCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.row, self.property_key)
    }
}

/// Keyboard navigation between cells
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Tab,
    ShiftTab,
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            "tab" => Ok(Self::Tab),
            "shift-tab" | "shift_tab" | "shifttab" => Ok(Self::ShiftTab),
            other => Err(Error::Parse(format!(
                "unknown navigation direction '{other}'"
            ))),
        }
    }
}

/// Visible grid geometry used to resolve focus and navigation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridLayout {
    rows: Vec<RowRef>,
    columns: Vec<String>,
}

impl GridLayout {
    pub fn new(rows: Vec<RowRef>, columns: Vec<String>) -> Self {
        Self { rows, columns }
    }

    /// Columns in schema display order
    pub fn from_schema(schema: &PropertyMap, rows: Vec<RowRef>) -> Self {
        let columns = property::ordered(schema)
            .into_iter()
            .map(|definition| definition.key.clone())
            .collect();
        Self { rows, columns }
    }

    #[must_use]
    pub fn contains(&self, cell: &ActiveCell) -> bool {
        self.position(cell).is_some()
    }

    fn position(&self, cell: &ActiveCell) -> Option<(usize, usize)> {
        let row = self.rows.iter().position(|row| *row == cell.row)?;
        let column = self
            .columns
            .iter()
            .position(|key| *key == cell.property_key)?;
        Some((row, column))
    }

    fn cell_at(&self, row: usize, column: usize) -> Option<ActiveCell> {
        Some(ActiveCell::new(
            *self.rows.get(row)?,
            self.columns.get(column)?.clone(),
        ))
    }

    fn step(&self, (row, column): (usize, usize), direction: Direction) -> Option<(usize, usize)> {
        let last_row = self.rows.len().checked_sub(1)?;
        let last_column = self.columns.len().checked_sub(1)?;
        match direction {
            Direction::Up => row.checked_sub(1).map(|row| (row, column)),
            Direction::Down => (row < last_row).then_some((row + 1, column)),
            Direction::Left => column.checked_sub(1).map(|column| (row, column)),
            Direction::Right => (column < last_column).then_some((row, column + 1)),
            Direction::Tab => {
                if column < last_column {
                    Some((row, column + 1))
                } else {
                    (row < last_row).then_some((row + 1, 0))
                }
            }
            Direction::ShiftTab => {
                if column > 0 {
                    Some((row, column - 1))
                } else {
                    row.checked_sub(1).map(|row| (row, last_column))
                }
            }
        }
    }
}

/// Result of a focus transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusChange {
    /// Cell that lost focus, to be observed by autosave first
    pub blurred: Option<ActiveCell>,
    pub focused: ActiveCell,
}

/// Owns the single active cell of an editing session
#[derive(Debug, Default)]
pub struct EditSessionController {
    active: Option<ActiveCell>,
}

impl EditSessionController {
    pub const fn new() -> Self {
        Self { active: None }
    }

    pub const fn active(&self) -> Option<&ActiveCell> {
        self.active.as_ref()
    }

    /// Focus a cell, implicitly blurring the previous one.
    ///
    /// Returns `None` when the cell already has focus.
    pub fn focus(&mut self, cell: ActiveCell, grid: &GridLayout) -> Result<Option<FocusChange>> {
        if !grid.contains(&cell) {
            tracing::warn!("Refusing focus on cell outside the grid: {}", cell);
            return Err(Error::IntegrityViolation(format!(
                "cell {cell} is not part of the visible grid"
            )));
        }
        if self.active.as_ref() == Some(&cell) {
            return Ok(None);
        }

        let blurred = self.active.replace(cell.clone());
        tracing::debug!("Focused cell {}", cell);
        Ok(Some(FocusChange {
            blurred,
            focused: cell,
        }))
    }

    /// Clear focus, returning the cell that had it.
    pub fn blur(&mut self) -> Option<ActiveCell> {
        let blurred = self.active.take();
        if let Some(cell) = &blurred {
            tracing::debug!("Blurred cell {}", cell);
        }
        blurred
    }

    /// Move focus in `direction`.
    ///
    /// Moving past the grid edge is a no-op (`Ok(None)`); `tab` wraps from
    /// the last column to the first column of the next row and `shift_tab`
    /// the reverse.
    pub fn navigate(
        &mut self,
        direction: Direction,
        grid: &GridLayout,
    ) -> Result<Option<FocusChange>> {
        let Some(active) = self.active.as_ref() else {
            return Ok(None);
        };
        let Some(position) = grid.position(active) else {
            tracing::warn!("Active cell {} vanished from the grid", active);
            return Err(Error::IntegrityViolation(format!(
                "active cell {active} is not part of the visible grid"
            )));
        };

        let Some(target) = grid
            .step(position, direction)
            .and_then(|(row, column)| grid.cell_at(row, column))
        else {
            return Ok(None);
        };
        self.focus(target, grid)
    }

    /// Drop focus if it sits on `row`, used when a row stops existing.
    pub fn release_row(&mut self, row: RowRef) -> Option<ActiveCell> {
        if self.active.as_ref().is_some_and(|cell| cell.row == row) {
            self.blur()
        } else {
            None
        }
    }

    /// Move focus from one row to another, keeping the column.
    pub fn retarget_row(&mut self, from: RowRef, to: RowRef) {
        if let Some(cell) = self.active.as_mut().filter(|cell| cell.row == from) {
            cell.row = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordId;
    use pretty_assertions::assert_eq;

    fn grid(rows: usize) -> (GridLayout, Vec<RecordId>) {
        let ids: Vec<RecordId> = (0..rows).map(|_| RecordId::new()).collect();
        let layout = GridLayout::new(
            ids.iter().copied().map(RowRef::Record).collect(),
            vec!["title".into(), "amount".into(), "date".into()],
        );
        (layout, ids)
    }

    #[test]
    fn focus_blurs_previous_cell() {
        let (layout, ids) = grid(2);
        let mut controller = EditSessionController::new();

        let first = controller
            .focus(ActiveCell::new(ids[0], "title"), &layout)
            .unwrap()
            .unwrap();
        assert_eq!(first.blurred, None);

        let second = controller
            .focus(ActiveCell::new(ids[1], "amount"), &layout)
            .unwrap()
            .unwrap();
        assert_eq!(second.blurred, Some(ActiveCell::new(ids[0], "title")));
        assert_eq!(controller.active(), Some(&ActiveCell::new(ids[1], "amount")));
    }

    #[test]
    fn refocusing_same_cell_is_noop() {
        let (layout, ids) = grid(1);
        let mut controller = EditSessionController::new();
        controller
            .focus(ActiveCell::new(ids[0], "title"), &layout)
            .unwrap();
        assert_eq!(
            controller
                .focus(ActiveCell::new(ids[0], "title"), &layout)
                .unwrap(),
            None
        );
    }

    #[test]
    fn focus_outside_grid_is_integrity_violation() {
        let (layout, _) = grid(1);
        let mut controller = EditSessionController::new();
        let result = controller.focus(ActiveCell::new(RowRef::Draft, "title"), &layout);
        assert!(matches!(result, Err(Error::IntegrityViolation(_))));
        assert_eq!(controller.active(), None);
    }

    #[test]
    fn tab_wraps_to_next_row() {
        let (layout, ids) = grid(2);
        let mut controller = EditSessionController::new();
        controller
            .focus(ActiveCell::new(ids[0], "date"), &layout)
            .unwrap();

        let change = controller
            .navigate(Direction::Tab, &layout)
            .unwrap()
            .unwrap();
        assert_eq!(change.focused, ActiveCell::new(ids[1], "title"));

        let back = controller
            .navigate(Direction::ShiftTab, &layout)
            .unwrap()
            .unwrap();
        assert_eq!(back.focused, ActiveCell::new(ids[0], "date"));
    }

    #[test]
    fn navigating_past_edges_is_noop() {
        let (layout, ids) = grid(2);
        let mut controller = EditSessionController::new();
        let last = ActiveCell::new(ids[1], "date");
        controller.focus(last.clone(), &layout).unwrap();

        for direction in [Direction::Tab, Direction::Down, Direction::Right] {
            assert_eq!(controller.navigate(direction, &layout).unwrap(), None);
            assert_eq!(controller.active(), Some(&last));
        }

        let first = ActiveCell::new(ids[0], "title");
        controller.focus(first.clone(), &layout).unwrap();
        for direction in [Direction::ShiftTab, Direction::Up, Direction::Left] {
            assert_eq!(controller.navigate(direction, &layout).unwrap(), None);
            assert_eq!(controller.active(), Some(&first));
        }
    }

    #[test]
    fn arrows_move_within_bounds() {
        let (layout, ids) = grid(2);
        let mut controller = EditSessionController::new();
        controller
            .focus(ActiveCell::new(ids[0], "amount"), &layout)
            .unwrap();

        controller.navigate(Direction::Down, &layout).unwrap();
        assert_eq!(controller.active(), Some(&ActiveCell::new(ids[1], "amount")));
        controller.navigate(Direction::Left, &layout).unwrap();
        assert_eq!(controller.active(), Some(&ActiveCell::new(ids[1], "title")));
    }

    #[test]
    fn navigate_without_focus_is_noop() {
        let (layout, _) = grid(1);
        let mut controller = EditSessionController::new();
        assert_eq!(controller.navigate(Direction::Tab, &layout).unwrap(), None);
    }

    #[test]
    fn release_and_retarget_row() {
        let (_, ids) = grid(1);
        let layout = GridLayout::new(vec![RowRef::Draft], vec!["title".into()]);
        let mut controller = EditSessionController::new();
        controller
            .focus(ActiveCell::new(RowRef::Draft, "title"), &layout)
            .unwrap();

        controller.retarget_row(RowRef::Draft, RowRef::Record(ids[0]));
        assert_eq!(controller.active(), Some(&ActiveCell::new(ids[0], "title")));

        assert_eq!(controller.release_row(RowRef::Draft), None);
        assert!(controller.release_row(RowRef::Record(ids[0])).is_some());
        assert_eq!(controller.active(), None);
    }

    #[test]
    fn direction_parses_hyphenated_shift_tab() {
        assert_eq!("shift-tab".parse::<Direction>().unwrap(), Direction::ShiftTab);
        assert_eq!("Tab".parse::<Direction>().unwrap(), Direction::Tab);
        assert!(matches!(
            "diagonal".parse::<Direction>(),
            Err(Error::Parse(_))
        ));
    }
}
