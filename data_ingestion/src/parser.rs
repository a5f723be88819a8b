use crate::error::ParseError;
use log::{debug, warn};
use scraper::{ElementRef, Html, Selector};

/// Cells read from one history row: date, open, high, low, close.
const CELLS_PER_ROW: usize = 5;

/// One price-history row. Unparsable cells are NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OhlcRow {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl OhlcRow {
    pub fn missing() -> Self {
        Self {
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
        }
    }

    pub fn is_complete(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// The four observations the features are derived from, newest first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSnapshot {
    pub current: OhlcRow,
    pub lag1: OhlcRow,
    pub lag2: OhlcRow,
    /// Best effort: may carry NaN values when the row is missing or unparsable.
    pub lag3: OhlcRow,
}

/// Where the price history lives in the page and which rows to read.
///
/// The row positions count every `tr` inside the table, header rows included.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    pub selector: String,
    pub min_rows: usize,
    pub current_row: usize,
    pub lag_rows: [usize; 3],
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            selector: "table.chart-price-history-table".to_string(),
            min_rows: 6,
            current_row: 2,
            lag_rows: [3, 4, 5],
        }
    }
}

impl TableLayout {
    pub fn with_selector(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Default::default()
        }
    }

    pub fn parse(&self, markup: &str) -> Result<PriceSnapshot, ParseError> {
        let table_selector = Selector::parse(&self.selector)
            .map_err(|e| ParseError::InvalidSelector(e.to_string()))?;
        let tr = Selector::parse("tr").map_err(|e| ParseError::InvalidSelector(e.to_string()))?;
        let td = Selector::parse("td").map_err(|e| ParseError::InvalidSelector(e.to_string()))?;

        let document = Html::parse_document(markup);
        let table = document
            .select(&table_selector)
            .next()
            .ok_or(ParseError::TableNotFound)?;

        let rows: Vec<ElementRef> = table.select(&tr).collect();
        debug!("Found {} rows in price history table", rows.len());
        if rows.len() < self.min_rows {
            return Err(ParseError::NotEnoughRows {
                found: rows.len(),
                required: self.min_rows,
            });
        }

        let required = |index: usize, label: &'static str| {
            rows.get(index)
                .and_then(|row| extract_row(*row, &td))
                .filter(OhlcRow::is_complete)
                .ok_or(ParseError::UnusableRow { index, label })
        };

        let current = required(self.current_row, "current")?;
        let lag1 = required(self.lag_rows[0], "lag-1")?;
        let lag2 = required(self.lag_rows[1], "lag-2")?;

        let lag3 = rows
            .get(self.lag_rows[2])
            .and_then(|row| extract_row(*row, &td))
            .unwrap_or_else(OhlcRow::missing);
        if !lag3.close.is_finite() {
            warn!("Lag-3 close is unavailable, change_lag2 falls back to 0.0");
        }

        Ok(PriceSnapshot {
            current,
            lag1,
            lag2,
            lag3,
        })
    }
}

/// Parses a table cell as a number, stripping thousands separators.
pub fn parse_number(text: &str) -> f64 {
    let cleaned = text.trim().replace(',', "");
    match cleaned.parse::<f64>() {
        Ok(value) => value,
        Err(_) => {
            warn!("Could not parse float from value: {text:?}");
            f64::NAN
        }
    }
}

// None when the row has fewer cells than a history row
fn extract_row(row: ElementRef, td: &Selector) -> Option<OhlcRow> {
    let cells: Vec<String> = row
        .select(td)
        .map(|cell| cell.text().collect::<String>())
        .collect();

    if cells.len() < CELLS_PER_ROW {
        return None;
    }

    Some(OhlcRow {
        open: parse_number(&cells[1]),
        high: parse_number(&cells[2]),
        low: parse_number(&cells[3]),
        close: parse_number(&cells[4]),
    })
}
