//! Locator strategies and the logical target catalog.
//!
//! A target is a stable logical name for a UI element (`addClusterButton`,
//! `scanDialog`). Each target owns an ordered list of candidate locators;
//! the resolver walks them in declaration order and takes the first live
//! match.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One way of finding an element in the page.
///
/// In YAML each locator is a single-key map, with `role` optionally paired
/// with an accessible `name`:
///
/// ```yaml
/// - css: "button.add-cluster"
/// - text: "添加集群"
/// - role: button
///   name: "Add cluster"
/// - xpath: "//button[contains(., 'Add')]"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    Css {
        css: String,
    },
    Text {
        text: String,
    },
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    XPath {
        xpath: String,
    },
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css {
            css: selector.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath { xpath: expr.into() }
    }

    /// Short strategy name used in traces and logs.
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::Css { .. } => "css",
            Self::Text { .. } => "text",
            Self::Role { .. } => "role",
            Self::XPath { .. } => "xpath",
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css { css } => write!(f, "css={css}"),
            Self::Text { text } => write!(f, "text={text}"),
            Self::Role { role, name: None } => write!(f, "role={role}"),
            Self::Role {
                role,
                name: Some(name),
            } => write!(f, "role={role}[name=\"{name}\"]"),
            Self::XPath { xpath } => write!(f, "xpath={xpath}"),
        }
    }
}

/// Mapping from logical target names to ranked candidate locators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetCatalog {
    targets: BTreeMap<String, Vec<Locator>>,
}

impl TargetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn insert(&mut self, name: impl Into<String>, candidates: Vec<Locator>) -> &mut Self {
        self.targets.insert(name.into(), candidates);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[Locator]> {
        self.targets.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Merge `other` into `self`; entries in `other` replace same-named
    /// entries here.
    pub fn merge(&mut self, other: &TargetCatalog) {
        for (name, candidates) in &other.targets {
            self.targets.insert(name.clone(), candidates.clone());
        }
    }

    /// Names of targets declared with no candidates at all.
    pub fn empty_targets(&self) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|(_, candidates)| candidates.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
