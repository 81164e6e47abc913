use std::fmt;

/// Account a build instruction executes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    Root,
    BuildUser,
}

impl fmt::Display for Privilege {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Privilege::Root => f.write_str("root"),
            Privilege::BuildUser => f.write_str("${NB_USER}"),
        }
    }
}

/// One shell script tagged with the account it runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub privilege: Privilege,
    pub script: String,
}

impl Instruction {
    pub fn new(privilege: Privilege, script: impl Into<String>) -> Self {
        Self {
            privilege,
            script: script.into(),
        }
    }

    pub fn root(script: impl Into<String>) -> Self {
        Self::new(Privilege::Root, script)
    }

    pub fn build_user(script: impl Into<String>) -> Self {
        Self::new(Privilege::BuildUser, script)
    }
}
