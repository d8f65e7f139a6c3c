use std::str::FromStr;

pub const DEFAULT_PANEL_NAME: &str = "NSPanel Pro";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InvalidPanelId {
    #[error("panel ID must not be empty")]
    Empty,
    #[error("panel ID `{0}` must not contain `/`, `+` or `#`")]
    TopicCharacters(String),
}

/// Identifies a panel in the outbound topic namespace, so it is restricted to a single topic
/// level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PanelId(String);

impl PanelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PanelId {
    type Err = InvalidPanelId;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(InvalidPanelId::Empty);
        }
        if s.contains(['/', '+', '#']) {
            return Err(InvalidPanelId::TopicCharacters(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl std::fmt::Display for PanelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(clap::Parser, Clone)]
#[group(id = "panel::Args")]
pub struct Args {
    /// Unique identifier of the panel.
    #[arg(long)]
    pub panel_id: PanelId,

    /// Human readable panel name, used for display only.
    #[arg(long, default_value = DEFAULT_PANEL_NAME)]
    pub panel_name: String,
}

/// The configuration entry of one panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelConfig {
    pub id: PanelId,
    pub name: String,
}

impl PanelConfig {
    pub fn new(id: PanelId) -> Self {
        Self { id, name: DEFAULT_PANEL_NAME.to_string() }
    }
}

impl From<Args> for PanelConfig {
    fn from(args: Args) -> Self {
        Self { id: args.panel_id, name: args.panel_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_ids() {
        assert_eq!("hallway".parse::<PanelId>().unwrap().as_str(), "hallway");
        assert_eq!("p1".parse::<PanelId>().unwrap().to_string(), "p1");
        assert_eq!("".parse::<PanelId>(), Err(InvalidPanelId::Empty));
        for bad in ["a/b", "p+", "#"] {
            assert_eq!(
                bad.parse::<PanelId>(),
                Err(InvalidPanelId::TopicCharacters(bad.to_string()))
            );
        }
    }

    #[test]
    fn default_name() {
        let config = PanelConfig::new("p1".parse().unwrap());
        assert_eq!(config.name, "NSPanel Pro");
    }
}
