//! Installer pipeline stages.

use std::fmt;

/// The states of one installer run, in the order they are reached.
///
/// `Extracted → Validated → DependenciesOrdered → PackagesCompiled →
/// TemplatesRendered → Installed`. A stage only starts after its predecessor
/// succeeded; [`InstallFailure`](super::InstallFailure) records the stage that
/// was being entered when a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstallStage {
    /// The release has been unpacked and parsed.
    Extracted,
    /// Validators accepted the release and the manifest's job selection.
    Validated,
    /// Packages have been put in dependency order.
    DependenciesOrdered,
    /// Every package has a compiled artifact (cached or fresh).
    PackagesCompiled,
    /// Every selected job has a rendered template artifact.
    TemplatesRendered,
    /// Packages and rendered templates are on the target.
    Installed,
}

impl InstallStage {
    /// All stages in pipeline order.
    pub const ALL: [InstallStage; 6] = [
        Self::Extracted,
        Self::Validated,
        Self::DependenciesOrdered,
        Self::PackagesCompiled,
        Self::TemplatesRendered,
        Self::Installed,
    ];

    /// Short verb phrase describing the work that leads to this stage.
    pub const fn description(self) -> &'static str {
        match self {
            Self::Extracted => "extracting release",
            Self::Validated => "validating release",
            Self::DependenciesOrdered => "ordering package dependencies",
            Self::PackagesCompiled => "compiling packages",
            Self::TemplatesRendered => "rendering job templates",
            Self::Installed => "installing jobs",
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}
