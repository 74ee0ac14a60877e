/// Trims and upper-cases a raw ticker entry.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Outcome of [`Portfolio::add`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added(String),
    Duplicate(String),
    Empty,
}

/// Tracked symbols in insertion order, without duplicates.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Portfolio {
    symbols: Vec<String>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, raw: &str) -> AddOutcome {
        let symbol = normalize_symbol(raw);
        if symbol.is_empty() {
            return AddOutcome::Empty;
        }
        if self.contains(&symbol) {
            return AddOutcome::Duplicate(symbol);
        }
        self.symbols.push(symbol.clone());
        AddOutcome::Added(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        let symbol = normalize_symbol(symbol);
        self.symbols.iter().any(|s| *s == symbol)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
