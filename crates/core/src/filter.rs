/// Per request allowlist of branches.
///
/// An empty allowlist lets every branch through. Otherwise a branch passes
/// only on an exact, case sensitive match.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BranchFilter {
    allowed: Vec<String>,
}

impl BranchFilter {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, branch: &str) -> bool {
        self.allowed.is_empty() || self.allowed.iter().any(|allowed| allowed == branch)
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }
}
