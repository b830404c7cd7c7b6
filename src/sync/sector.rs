//! Fixed spreadsheet layout of each sector.
//!
//! Every sector reads one range of its own spreadsheet (header row excluded)
//! and maps column indexes to fields. The layouts are compile-time tables so
//! the set of fields each sector owns is statically enumerable, and the diff
//! in `reconcile` works from the same table for every sector.

use super::model::{Field, Sector};

/// Column layout of one sector's sheet.
#[derive(Debug)]
pub struct SectorLayout {
    pub sector: Sector,
    /// A1 range fetched from the sheet.
    pub range: &'static str,
    /// Sheet row number of the first fetched row.
    pub first_row: usize,
    /// Column holding the identity key.
    pub code_client_column: usize,
    /// Column index → field, in sheet order.
    pub columns: &'static [(usize, Field)],
}

impl SectorLayout {
    /// Fields this sector maps, in sheet order.
    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.columns.iter().map(|(_, field)| *field)
    }

    /// Fields compared against stored records on update.
    pub fn diffable_fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.fields().filter(|f| !f.is_app_owned())
    }

    /// 1-based sheet row of the `index`-th fetched row, for logs.
    pub fn sheet_row(&self, index: usize) -> usize {
        self.first_row + index
    }

    /// Raw cell for the identity key, trimmed. `None` when missing or blank.
    pub fn code_client<'a>(&self, row: &'a [String]) -> Option<&'a str> {
        row.get(self.code_client_column)
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
    }
}

static CHR: SectorLayout = SectorLayout {
    sector: Sector::Chr,
    range: "CHR!A2:K",
    first_row: 2,
    code_client_column: 3,
    columns: &[
        (0, Field::DateCdeMateriel),
        (1, Field::Commercial),
        (2, Field::Materiel),
        (4, Field::Nom),
        (5, Field::Ville),
        (6, Field::Telephone),
        (7, Field::Tech),
        (8, Field::DateInstall),
        (9, Field::Commentaire),
        (10, Field::Adresse),
    ],
};

static HACCP: SectorLayout = SectorLayout {
    sector: Sector::Haccp,
    range: "HACCP!A2:J",
    first_row: 2,
    code_client_column: 2,
    columns: &[
        (0, Field::DateCdeMateriel),
        (1, Field::Commercial),
        (3, Field::Nom),
        (4, Field::Ville),
        (5, Field::Telephone),
        (6, Field::NbSondes),
        (7, Field::Tech),
        (8, Field::DateInstall),
        (9, Field::Commentaire),
    ],
};

static TABAC: SectorLayout = SectorLayout {
    sector: Sector::Tabac,
    range: "TABAC!A2:K",
    first_row: 2,
    code_client_column: 0,
    columns: &[
        (1, Field::Nom),
        (2, Field::Ville),
        (3, Field::Telephone),
        (4, Field::Commercial),
        (5, Field::DateCdeMateriel),
        (6, Field::NumeroBuraliste),
        (7, Field::TypeCaisse),
        (8, Field::Tech),
        (9, Field::DateInstall),
        (10, Field::Commentaire),
    ],
};

static KEZIA: SectorLayout = SectorLayout {
    sector: Sector::Kezia,
    range: "KEZIA!A2:J",
    first_row: 2,
    code_client_column: 1,
    columns: &[
        (0, Field::DateCdeMateriel),
        (2, Field::Nom),
        (3, Field::Ville),
        (4, Field::Telephone),
        (5, Field::Commercial),
        (6, Field::Licence),
        (7, Field::VersionLogiciel),
        (8, Field::DateInstall),
        (9, Field::Commentaire),
    ],
};

impl Sector {
    pub fn layout(&self) -> &'static SectorLayout {
        match self {
            Sector::Chr => &CHR,
            Sector::Haccp => &HACCP,
            Sector::Tabac => &TABAC,
            Sector::Kezia => &KEZIA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const COMMON: [Field; 5] = [
        Field::Nom,
        Field::Ville,
        Field::Telephone,
        Field::Commercial,
        Field::DateCdeMateriel,
    ];

    #[test]
    fn every_sector_maps_the_common_fields() {
        for sector in Sector::ALL {
            let fields: HashSet<Field> = sector.layout().fields().collect();
            for common in COMMON {
                assert!(fields.contains(&common), "{} is missing {}", sector, common);
            }
        }
    }

    #[test]
    fn layouts_never_reuse_a_column() {
        for sector in Sector::ALL {
            let layout = sector.layout();
            let mut seen = HashSet::new();
            seen.insert(layout.code_client_column);
            for (index, _) in layout.columns {
                assert!(seen.insert(*index), "{} reuses column {}", sector, index);
            }
        }
    }

    #[test]
    fn layout_sector_matches_lookup_key() {
        for sector in Sector::ALL {
            assert_eq!(sector.layout().sector, sector);
        }
    }

    #[test]
    fn diffable_fields_exclude_app_owned() {
        let diffable: Vec<Field> = Sector::Chr.layout().diffable_fields().collect();
        assert!(!diffable.contains(&Field::Tech));
        assert!(!diffable.contains(&Field::DateInstall));
        assert!(diffable.contains(&Field::Nom));
    }

    #[test]
    fn code_client_is_trimmed_and_blank_is_none() {
        let layout = Sector::Chr.layout();
        let row: Vec<String> = ["", "", "", "  C001 "].iter().map(|s| s.to_string()).collect();
        assert_eq!(layout.code_client(&row), Some("C001"));

        let blank: Vec<String> = ["", "", "", "   "].iter().map(|s| s.to_string()).collect();
        assert_eq!(layout.code_client(&blank), None);

        let short: Vec<String> = vec!["x".to_string()];
        assert_eq!(layout.code_client(&short), None);
    }

    #[test]
    fn first_row_matches_range_start() {
        for sector in Sector::ALL {
            let layout = sector.layout();
            let start: usize = layout
                .range
                .split_once("!A")
                .and_then(|(_, rest)| rest.split(':').next())
                .and_then(|n| n.parse().ok())
                .unwrap();
            assert_eq!(layout.first_row, start, "{}", sector);
            assert_eq!(layout.sheet_row(0), start);
            assert_eq!(layout.sheet_row(3), start + 3);
        }
    }
}
