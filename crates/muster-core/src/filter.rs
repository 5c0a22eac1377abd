use serde::{Deserialize, Serialize};

/// Node-selection filter handed to the agent client's discovery call.
///
/// Compound filters combine predicates in a way that cannot be safely
/// re-evaluated per batch, so the batch path refuses them up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeFilter {
    /// Every discoverable agent.
    All,
    /// Explicit agent identities.
    Identity { names: Vec<String> },
    /// Agents carrying a configuration class.
    Class { name: String },
    /// Agents whose named fact has the given value.
    Fact { name: String, value: String },
    /// Free-form boolean expression over classes and facts.
    Compound { expr: String },
}

impl NodeFilter {
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Compound { .. })
    }

    /// Filter matching a fixed list of identities.
    pub fn identities<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Identity {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl std::fmt::Display for NodeFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Identity { names } => write!(f, "identity={}", names.join(",")),
            Self::Class { name } => write!(f, "class={}", name),
            Self::Fact { name, value } => write!(f, "fact {}={}", name, value),
            Self::Compound { expr } => write!(f, "compound({})", expr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_detection() {
        assert!(NodeFilter::Compound {
            expr: "class=web and country=fr".into()
        }
        .is_compound());
        assert!(!NodeFilter::All.is_compound());
        assert!(!NodeFilter::identities(["a", "b"]).is_compound());
    }

    #[test]
    fn test_display() {
        let filter = NodeFilter::identities(["web01", "web02"]);
        assert_eq!(filter.to_string(), "identity=web01,web02");

        let filter = NodeFilter::Fact {
            name: "country".into(),
            value: "de".into(),
        };
        assert_eq!(filter.to_string(), "fact country=de");
    }

    #[test]
    fn test_serde_round_trip() {
        let filter = NodeFilter::Class { name: "web".into() };
        let json = serde_json::to_string(&filter).unwrap();
        assert!(json.contains("\"type\":\"class\""));
        let back: NodeFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(back, filter);
    }
}
