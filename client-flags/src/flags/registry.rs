use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagDefinition {
    pub name: &'static str,
    pub default_value: bool,
}

/// Declares the closed set of flags the client knows about.
///
/// Each entry becomes a `Flag` variant carrying its wire name and compiled default, so call
/// sites resolve typed flags and a typo is a compile error rather than a silent `false`.
macro_rules! flag_registry {
    ($( $(#[$meta:meta])* $variant:ident => ($name:literal, $default:expr) ),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Flag {
            $( $(#[$meta])* $variant, )+
        }

        impl Flag {
            pub const ALL: &'static [Flag] = &[$( Flag::$variant ),+];

            pub const fn name(self) -> &'static str {
                match self {
                    $( Flag::$variant => $name, )+
                }
            }

            pub const fn default_value(self) -> bool {
                match self {
                    $( Flag::$variant => $default, )+
                }
            }
        }
    };
}

flag_registry! {
    /// Redesigned first-run onboarding.
    NewOnboarding => ("new_onboarding", false),
    /// Queue writes locally while offline and replay them on reconnect.
    OfflineMode => ("offline_mode", true),
    /// Second iteration of the paywall screen.
    PaywallV2 => ("paywall_v2", false),
    StreakReminders => ("streak_reminders", true),
    SocialSharing => ("social_sharing", false),
    InAppReviewPrompt => ("in_app_review_prompt", false),
}

impl Flag {
    pub fn from_name(name: &str) -> Option<Flag> {
        Self::ALL.iter().copied().find(|flag| flag.name() == name)
    }

    pub fn definition(self) -> FlagDefinition {
        FlagDefinition {
            name: self.name(),
            default_value: self.default_value(),
        }
    }

    pub fn definitions() -> impl Iterator<Item = FlagDefinition> {
        Self::ALL.iter().map(|flag| flag.definition())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFlag(pub String);

impl fmt::Display for UnknownFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown feature flag `{}`", self.0)
    }
}

impl std::error::Error for UnknownFlag {}

impl FromStr for Flag {
    type Err = UnknownFlag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Flag::from_name(s).ok_or_else(|| UnknownFlag(s.to_string()))
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
