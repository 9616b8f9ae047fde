use std::io::IsTerminal;

use comfy_table::{presets::NOTHING, Attribute, Cell, Table};

/// Borderless tables; bold accents only on a color-capable terminal.
fn use_color() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

fn accent_cell(text: &str, color: bool) -> Cell {
    let cell = Cell::new(text);
    if color {
        cell.add_attribute(Attribute::Bold)
    } else {
        cell
    }
}

pub(crate) fn data_table(headers: &[&str]) -> Table {
    let color = use_color();
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(headers.iter().map(|h| accent_cell(h, color)).collect::<Vec<_>>());
    table
}

pub(crate) fn kv_table() -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table
}

pub(crate) fn add_kv_row(table: &mut Table, field: &str, value: impl ToString) {
    table.add_row(vec![
        accent_cell(field, use_color()),
        Cell::new(value.to_string()),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_table_is_borderless() {
        let mut table = data_table(&["Run", "Date"]);
        assert_eq!(table.current_style_as_preset(), NOTHING);
    }

    #[test]
    fn kv_rows_render_field_and_value() {
        let mut table = kv_table();
        add_kv_row(&mut table, "Snapshots", 12);
        let rendered = table.to_string();
        assert!(rendered.contains("Snapshots"));
        assert!(rendered.contains("12"));
    }
}
