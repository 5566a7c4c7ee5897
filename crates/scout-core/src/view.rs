use serde::{Deserialize, Serialize};

/// Top-level screens of the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    Chat,
    Research,
    History,
}

impl View {
    pub fn as_str(&self) -> &'static str {
        match self {
            View::Chat => "chat",
            View::Research => "research",
            View::History => "history",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "chat" => Some(View::Chat),
            "research" | "agent" => Some(View::Research),
            "history" => Some(View::History),
            _ => None,
        }
    }

    pub fn all() -> Vec<View> {
        vec![View::Chat, View::Research, View::History]
    }

    /// The view `Tab` moves to.
    pub fn next(&self) -> View {
        match self {
            View::Chat => View::Research,
            View::Research => View::History,
            View::History => View::Chat,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            View::Chat => "Chat",
            View::Research => "Research",
            View::History => "History",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "dark" => Some(Theme::Dark),
            "light" => Some(Theme::Light),
            _ => None,
        }
    }

    pub fn toggled(&self) -> Theme {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_order_cycles_through_every_view() {
        let mut view = View::Chat;
        for _ in 0..View::all().len() {
            view = view.next();
        }
        assert_eq!(view, View::Chat);
    }

    #[test]
    fn parse_accepts_names_case_insensitively() {
        assert_eq!(View::parse("Research"), Some(View::Research));
        assert_eq!(View::parse("agent"), Some(View::Research));
        assert_eq!(View::parse("nope"), None);
        assert_eq!(Theme::parse("LIGHT"), Some(Theme::Light));
    }
}
