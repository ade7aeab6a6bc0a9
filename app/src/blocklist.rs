/// Number prefixes whose calls get picked up and hung up straight away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blocklist {
    prefixes: Vec<String>,
}

impl Blocklist {
    /// Comma separated prefixes. Blanks inside an entry are ignored, empty
    /// entries are dropped.
    pub fn parse(list: &str) -> Self {
        let prefixes = list
            .split(',')
            .map(|p| p.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn matches(&self, number: &str) -> bool {
        self.prefixes.iter().any(|p| number.starts_with(p.as_str()))
    }
}
