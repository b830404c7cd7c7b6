use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One of the four fixed business lines, each with its own spreadsheet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    Chr,
    Haccp,
    Tabac,
    Kezia,
}

impl Sector {
    /// Processing order of a full sync.
    pub const ALL: [Sector; 4] = [Sector::Chr, Sector::Haccp, Sector::Tabac, Sector::Kezia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chr => "chr",
            Self::Haccp => "haccp",
            Self::Tabac => "tabac",
            Self::Kezia => "kezia",
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chr" => Ok(Self::Chr),
            "haccp" => Ok(Self::Haccp),
            "tabac" => Ok(Self::Tabac),
            "kezia" => Ok(Self::Kezia),
            _ => Err(format!("Invalid sector: {}", s)),
        }
    }
}

/// Installation progress. Only `InstallationComplete` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    #[serde(rename = "awaiting appointment")]
    AwaitingAppointment,
    #[serde(rename = "appointment scheduled")]
    AppointmentScheduled,
    #[serde(rename = "installation complete")]
    InstallationComplete,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingAppointment => "awaiting appointment",
            Self::AppointmentScheduled => "appointment scheduled",
            Self::InstallationComplete => "installation complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InstallationComplete)
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting appointment" => Ok(Self::AwaitingAppointment),
            "appointment scheduled" => Ok(Self::AppointmentScheduled),
            "installation complete" => Ok(Self::InstallationComplete),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Every business field a sector layout can map. The identity key
/// (`codeClient`) is not a field: it lives on the record itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Nom,
    Ville,
    Telephone,
    Commercial,
    DateCdeMateriel,
    Tech,
    DateInstall,
    Commentaire,
    Materiel,
    Adresse,
    NbSondes,
    TypeCaisse,
    NumeroBuraliste,
    Licence,
    VersionLogiciel,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nom => "nom",
            Self::Ville => "ville",
            Self::Telephone => "telephone",
            Self::Commercial => "commercial",
            Self::DateCdeMateriel => "dateCdeMateriel",
            Self::Tech => "tech",
            Self::DateInstall => "dateInstall",
            Self::Commentaire => "commentaire",
            Self::Materiel => "materiel",
            Self::Adresse => "adresse",
            Self::NbSondes => "nbSondes",
            Self::TypeCaisse => "typeCaisse",
            Self::NumeroBuraliste => "numeroBuraliste",
            Self::Licence => "licence",
            Self::VersionLogiciel => "versionLogiciel",
        }
    }

    /// Fields the portal edits after creation. The sheet seeds them on
    /// insert but never overwrites them.
    pub fn is_app_owned(&self) -> bool {
        matches!(self, Self::Tech | Self::DateInstall)
    }

    /// Fields normalized to ISO dates before storing.
    pub fn is_date(&self) -> bool {
        matches!(self, Self::DateCdeMateriel | Self::DateInstall)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field values of a record. `None` is an empty cell.
pub type FieldValues = BTreeMap<Field, Option<String>>;

/// A stored installation record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub id: String,
    pub code_client: String,
    pub secteur: Sector,
    pub status: Status,
    #[serde(default)]
    pub fields: FieldValues,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Installation {
    pub fn field(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).and_then(|v| v.as_deref())
    }
}

/// A record queued for insertion; the store assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewInstallation {
    pub code_client: String,
    pub secteur: Sector,
    pub status: Status,
    pub fields: FieldValues,
}

/// A write against an existing record, applied inside a store batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WriteOp {
    Update { id: String, patch: FieldValues },
    Terminate { id: String },
}

impl WriteOp {
    pub fn id(&self) -> &str {
        match self {
            Self::Update { id, .. } | Self::Terminate { id } => id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Technician,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Technician => "technician",
            Self::User => "user",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "technician" => Ok(Self::Technician),
            "user" => Ok(Self::User),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// A portal account, as far as credential resolution cares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub refresh_token: Option<String>,
}
