//! Prompt templates and their resolution into NPC instructions.
//!
//! Templates live in a prompts directory as `<tag>_<role>_<culprit|regular>.txt`.
//! Two shared files sit beside them: the town's collective memory and the
//! general rules every suspect follows. Resolution picks the single template
//! matching an NPC's role and culprit flag and fills in its placeholders.

use crate::profile::{normalize_role, NpcProfile};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default file name prefix for templates.
pub const DEFAULT_TAG: &str = "prompt";
/// Shared town memory file name.
pub const TOWN_MEMORY_FILE: &str = "town_collective_memory.txt";
/// Shared general rules file name.
pub const GENERAL_RULES_FILE: &str = "general_rules.txt";

pub const NAME_VARIABLE: &str = "name";
pub const POSSESSIONS_VARIABLE: &str = "possessions";
pub const TOWN_MEMORY_VARIABLE: &str = "TOWN COLLECTIVE MEMORY";
pub const GENERAL_RULES_VARIABLE: &str = "general_rules";

const CULPRIT_SUFFIX: &str = "culprit";
const REGULAR_SUFFIX: &str = "regular";

/// Errors from loading or resolving prompts.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template for role '{role}' is empty")]
    EmptyTemplate { role: String },

    #[error("No template for '{npc}' ({role}, culprit: {is_culprit})")]
    TemplateNotFound {
        npc: String,
        role: String,
        is_culprit: bool,
    },

    #[error("More than one template for '{npc}' ({role}, culprit: {is_culprit})")]
    DuplicateTemplate {
        npc: String,
        role: String,
        is_culprit: bool,
    },
}

/// A role-specific prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    role: String,
    is_culprit: bool,
    text: String,
}

impl PromptTemplate {
    /// Create a template. Blank text is rejected.
    pub fn new(
        role: impl AsRef<str>,
        is_culprit: bool,
        text: impl Into<String>,
    ) -> Result<Self, PromptError> {
        let role = normalize_role(role.as_ref());
        let text = text.into();
        if text.trim().is_empty() {
            return Err(PromptError::EmptyTemplate { role });
        }
        Ok(Self {
            role,
            is_culprit,
            text,
        })
    }

    /// Parse a template file stem such as `prompt_innkeeper_culprit`.
    ///
    /// Returns the role and culprit flag, or `None` when the stem does not
    /// follow the `<tag>_<role>_<culprit|regular>` shape.
    pub fn parse_file_stem(stem: &str, tag: &str) -> Option<(String, bool)> {
        let rest = stem.strip_prefix(tag)?.strip_prefix('_')?;
        let (role, kind) = rest.rsplit_once('_')?;
        if role.trim().is_empty() {
            return None;
        }
        let is_culprit = match kind {
            CULPRIT_SUFFIX => true,
            REGULAR_SUFFIX => false,
            _ => return None,
        };
        Some((normalize_role(role), is_culprit))
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn is_culprit(&self) -> bool {
        self.is_culprit
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Check whether this template applies to a profile.
    pub fn matches(&self, profile: &NpcProfile) -> bool {
        self.is_culprit == profile.is_culprit && self.role == profile.role
    }

    /// Replace every `{variable}` occurrence in the template.
    pub fn set_variable(&mut self, variable: &str, value: &str) {
        self.text = substitute(&self.text, variable, value);
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role:{}-culprit:{}", self.role, self.is_culprit)
    }
}

/// Literal replacement of `{variable}` with `value`.
pub fn substitute(text: &str, variable: &str, value: &str) -> String {
    text.replace(&format!("{{{variable}}}"), value)
}

/// Load every template in `dir` whose file stem matches the `<tag>_` scheme.
///
/// The extension is ignored. Files that do not parse are skipped. Results
/// are sorted by file name.
pub fn load_templates(dir: &Path, tag: &str) -> Result<Vec<PromptTemplate>, PromptError> {
    let io_err = |source| PromptError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut templates = Vec::new();
    for path in paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some((role, is_culprit)) = PromptTemplate::parse_file_stem(stem, tag) else {
            debug!(path = %path.display(), "Not a prompt template");
            continue;
        };
        let text = read_text(&path)?;
        match PromptTemplate::new(&role, is_culprit, text) {
            Ok(template) => {
                debug!(template = %template, path = %path.display(), "Loaded prompt template");
                templates.push(template);
            }
            Err(e) => debug!(path = %path.display(), "Skipping template: {e}"),
        }
    }
    Ok(templates)
}

/// Read the shared town memory file from `dir`.
pub fn load_town_memory(dir: &Path) -> Result<String, PromptError> {
    read_text(&dir.join(TOWN_MEMORY_FILE))
}

/// Read the shared general rules file from `dir`.
pub fn load_general_rules(dir: &Path) -> Result<String, PromptError> {
    read_text(&dir.join(GENERAL_RULES_FILE))
}

fn read_text(path: &Path) -> Result<String, PromptError> {
    std::fs::read_to_string(path).map_err(|source| PromptError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the instructions for one profile.
///
/// Exactly one template must match the profile's role and culprit flag.
pub fn resolve(
    profile: &NpcProfile,
    templates: &[PromptTemplate],
    town_memory: &str,
    general_rules: &str,
) -> Result<String, PromptError> {
    let mut matching = templates.iter().filter(|t| t.matches(profile));
    let Some(template) = matching.next() else {
        return Err(PromptError::TemplateNotFound {
            npc: profile.name.clone(),
            role: profile.role.clone(),
            is_culprit: profile.is_culprit,
        });
    };
    if matching.next().is_some() {
        return Err(PromptError::DuplicateTemplate {
            npc: profile.name.clone(),
            role: profile.role.clone(),
            is_culprit: profile.is_culprit,
        });
    }

    let mut template = template.clone();
    template.set_variable(NAME_VARIABLE, &profile.name);
    template.set_variable(POSSESSIONS_VARIABLE, &profile.possessions);
    template.set_variable(TOWN_MEMORY_VARIABLE, town_memory);
    template.set_variable(GENERAL_RULES_VARIABLE, general_rules);
    Ok(template.text)
}

/// Templates plus the shared texts, loaded once per game.
#[derive(Debug, Clone)]
pub struct PromptStore {
    templates: Vec<PromptTemplate>,
    town_memory: String,
    general_rules: String,
}

impl PromptStore {
    /// Build a store from in-memory parts.
    pub fn new(
        templates: Vec<PromptTemplate>,
        town_memory: impl Into<String>,
        general_rules: impl Into<String>,
    ) -> Self {
        Self {
            templates,
            town_memory: town_memory.into(),
            general_rules: general_rules.into(),
        }
    }

    /// Load templates with the default tag plus both shared files from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, PromptError> {
        Self::load_tagged(dir, DEFAULT_TAG)
    }

    /// Load templates with a custom file name tag.
    pub fn load_tagged(dir: impl AsRef<Path>, tag: &str) -> Result<Self, PromptError> {
        let dir = dir.as_ref();
        let templates = load_templates(dir, tag)?;
        let town_memory = load_town_memory(dir)?;
        let general_rules = load_general_rules(dir)?;
        debug!(count = templates.len(), dir = %dir.display(), "Loaded prompt store");
        Ok(Self::new(templates, town_memory, general_rules))
    }

    pub fn templates(&self) -> &[PromptTemplate] {
        &self.templates
    }

    pub fn town_memory(&self) -> &str {
        &self.town_memory
    }

    pub fn general_rules(&self) -> &str {
        &self.general_rules
    }

    /// Resolve the instructions for a profile.
    pub fn resolve(&self, profile: &NpcProfile) -> Result<String, PromptError> {
        resolve(
            profile,
            &self.templates,
            &self.town_memory,
            &self.general_rules,
        )
    }
}
