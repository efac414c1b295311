use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Platform family a provider belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    Psa,
    Rmm,
}

/// Supported upstream platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    ConnectwiseManage,
    Autotask,
    Halopsa,
    Syncro,
    Freshservice,
    Ninjaone,
    DattoRmm,
    Atera,
    TacticalRmm,
}

impl ProviderType {
    pub const ALL: [Self; 9] = [
        Self::ConnectwiseManage,
        Self::Autotask,
        Self::Halopsa,
        Self::Syncro,
        Self::Freshservice,
        Self::Ninjaone,
        Self::DattoRmm,
        Self::Atera,
        Self::TacticalRmm,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectwiseManage => "connectwise_manage",
            Self::Autotask => "autotask",
            Self::Halopsa => "halopsa",
            Self::Syncro => "syncro",
            Self::Freshservice => "freshservice",
            Self::Ninjaone => "ninjaone",
            Self::DattoRmm => "datto_rmm",
            Self::Atera => "atera",
            Self::TacticalRmm => "tactical_rmm",
        }
    }

    pub const fn family(self) -> ProviderFamily {
        match self {
            Self::ConnectwiseManage
            | Self::Autotask
            | Self::Halopsa
            | Self::Syncro
            | Self::Freshservice => ProviderFamily::Psa,
            Self::Ninjaone | Self::DattoRmm | Self::Atera | Self::TacticalRmm => ProviderFamily::Rmm,
        }
    }
}

impl Display for ProviderType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "connectwise_manage" | "connectwise" => Ok(Self::ConnectwiseManage),
            "autotask" => Ok(Self::Autotask),
            "halopsa" | "halo" => Ok(Self::Halopsa),
            "syncro" => Ok(Self::Syncro),
            "freshservice" => Ok(Self::Freshservice),
            "ninjaone" | "ninja" => Ok(Self::Ninjaone),
            "datto_rmm" | "datto" => Ok(Self::DattoRmm),
            "atera" => Ok(Self::Atera),
            "tactical_rmm" | "tactical" => Ok(Self::TacticalRmm),
            _ => Err(ValidationError::UnknownProviderType {
                value: value.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for provider in ProviderType::ALL {
            assert_eq!(provider.as_str().parse::<ProviderType>(), Ok(provider));
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let error = "kaseya".parse::<ProviderType>().expect_err("unknown");
        assert_eq!(
            error,
            ValidationError::UnknownProviderType {
                value: String::from("kaseya")
            }
        );
    }

    #[test]
    fn families_split_psa_and_rmm() {
        assert_eq!(ProviderType::Syncro.family(), ProviderFamily::Psa);
        assert_eq!(ProviderType::TacticalRmm.family(), ProviderFamily::Rmm);
    }
}
