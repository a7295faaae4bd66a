//! Output table schemas and row assembly.
//!
//! Three tables are produced per run: a flat CSV, a geostreams long-format
//! CSV, and a BETYdb-compatible CSV. Each has a fixed leading field order
//! followed by the algorithm's variable columns, and a defaults map that
//! guarantees every field resolves to something writable.

use std::collections::BTreeMap;

use tracing::warn;

use crate::algorithm::{AlgorithmSpec, TraitValue};

/// Trait names whose default value is an (empty) array rather than a string.
pub const TRAIT_NAME_ARRAY_VALUE: &[&str] = &["canopy_cover", "site"];

/// Fixed default values for known trait names.
pub const TRAIT_NAME_MAP: &[(&str, &str)] = &[
    ("local_datetime", ""),
    ("access_level", "2"),
    ("species", "Unknown"),
    ("citation_author", "\"Unknown\""),
    ("citation_year", "0000"),
    ("citation_title", "Unknown"),
    ("method", "Unknown"),
];

/// Leading fields of the flat CSV table.
pub const CSV_TRAIT_NAMES: &[&str] = &[
    "germplasmName",
    "site",
    "timestamp",
    "lat",
    "lon",
    "citation_author",
    "citation_year",
    "citation_title",
];

/// Fields of the geostreams table, one row per (plot, variable).
pub const GEO_TRAIT_NAMES: &[&str] = &[
    "site", "trait", "lat", "lon", "dp_time", "source", "value", "timestamp",
];

/// Leading fields of the BETYdb table.
pub const BETYDB_TRAIT_NAMES: &[&str] = &[
    "local_datetime",
    "access_level",
    "species",
    "site",
    "citation_author",
    "citation_year",
    "citation_title",
    "method",
];

/// Default value for a trait name: empty array for array-typed names, the
/// fixed mapping for known names, an empty string for everything else.
#[must_use]
pub fn default_trait(name: &str) -> TraitValue {
    if TRAIT_NAME_ARRAY_VALUE.contains(&name) {
        return TraitValue::List(Vec::new());
    }
    for (known, value) in TRAIT_NAME_MAP {
        if *known == name {
            return TraitValue::Text((*value).to_string());
        }
    }
    TraitValue::Text(String::new())
}

/// One output table: ordered field list plus current per-field values.
///
/// Values start at their schema defaults; the orchestrator overwrites the
/// per-plot fields before each write.
#[derive(Debug, Clone)]
pub struct TraitTable {
    fields: Vec<String>,
    values: BTreeMap<String, TraitValue>,
}

impl TraitTable {
    fn new(fields: Vec<String>, values: BTreeMap<String, TraitValue>) -> Self {
        Self { fields, values }
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Set one field's value. Unknown names are stored and simply never
    /// serialized, matching the permissive source behavior.
    pub fn set(&mut self, name: &str, value: TraitValue) {
        self.values.insert(name.to_string(), value);
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, TraitValue::Text(value.into()));
    }

    /// Assemble the row in field order. A field with no current value gets
    /// its default.
    #[must_use]
    pub fn row(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|field| {
                self.values
                    .get(field)
                    .cloned()
                    .unwrap_or_else(|| default_trait(field))
                    .to_string()
            })
            .collect()
    }
}

fn build_table(fields: Vec<String>) -> TraitTable {
    let values = fields
        .iter()
        .map(|field| (field.clone(), default_trait(field)))
        .collect();
    TraitTable::new(fields, values)
}

fn apply_citation(table: &mut TraitTable, spec: &AlgorithmSpec) {
    if !spec.citation.author.is_empty() {
        table.set_text("citation_author", spec.citation.author.clone());
    }
    if !spec.citation.title.is_empty() {
        table.set_text("citation_title", spec.citation.title.clone());
    }
    if !spec.citation.year.is_empty() {
        table.set_text("citation_year", spec.citation.year.clone());
    }
}

fn with_variables(leading: &[&str], variable_names: &[String]) -> Vec<String> {
    leading
        .iter()
        .map(|s| (*s).to_string())
        .chain(variable_names.iter().cloned())
        .collect()
}

/// Build the flat CSV table: fixed leading fields plus the algorithm's
/// variables, citation defaults overridden from the spec when declared.
#[must_use]
pub fn csv_traits_table(spec: &AlgorithmSpec) -> TraitTable {
    let mut table = build_table(with_variables(CSV_TRAIT_NAMES, &spec.variable_names));
    apply_citation(&mut table, spec);
    table
}

/// Build the geostreams table. Every field defaults to an empty string; the
/// variable columns live in the `trait`/`value` pair instead of the header.
#[must_use]
pub fn geo_traits_table() -> TraitTable {
    let fields: Vec<String> = GEO_TRAIT_NAMES.iter().map(|s| (*s).to_string()).collect();
    let values = fields
        .iter()
        .map(|f| (f.clone(), TraitValue::Text(String::new())))
        .collect();
    TraitTable::new(fields, values)
}

/// Build the BETYdb table with citation and method overrides applied.
#[must_use]
pub fn bety_traits_table(spec: &AlgorithmSpec) -> TraitTable {
    let mut table = build_table(with_variables(BETYDB_TRAIT_NAMES, &spec.variable_names));
    apply_citation(&mut table, spec);
    if !spec.method.is_empty() {
        table.set_text("method", spec.method.clone());
    }
    table
}

/// Header cells for the flat CSV: leading fields, then each variable name
/// with its label and parenthesized unit appended when available.
///
/// Mismatched unit/label list lengths degrade gracefully: missing entries
/// contribute no suffix, and the mismatch is logged as a warning.
#[must_use]
pub fn csv_header_fields(spec: &AlgorithmSpec) -> Vec<String> {
    let names = &spec.variable_names;
    let units = &spec.variable_units;
    let labels = &spec.variable_labels;

    if units.len() != names.len() {
        warn!("The number of variable units doesn't match the number of variable names");
        warn!("Continuing with defined variable units");
    }
    if !labels.is_empty() && labels.len() != names.len() {
        warn!("The number of variable labels doesn't match the number of variable names");
        warn!("Continuing with defined variable labels");
    }

    let mut header: Vec<String> = CSV_TRAIT_NAMES.iter().map(|s| (*s).to_string()).collect();
    for (idx, name) in names.iter().enumerate() {
        let mut cell = name.clone();
        if let Some(label) = labels.get(idx) {
            cell.push(' ');
            cell.push_str(label);
        }
        if let Some(unit) = units.get(idx) {
            cell.push_str(&format!(" ({unit})"));
        }
        header.push(cell);
    }
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{AlgorithmDeclarations, Citation};

    fn spec_with(names: &str, units: &str, labels: &str) -> AlgorithmSpec {
        let decls = AlgorithmDeclarations::from_pairs([
            ("VARIABLE_NAMES", names),
            ("VARIABLE_UNITS", units),
            ("VARIABLE_LABELS", labels),
        ]);
        AlgorithmSpec::from_declarations(&decls).unwrap()
    }

    #[test]
    fn test_default_trait_resolution_order() {
        // Array allow-list wins over the fixed map ('site' is in both)
        assert_eq!(default_trait("site"), TraitValue::List(Vec::new()));
        assert_eq!(default_trait("canopy_cover"), TraitValue::List(Vec::new()));
        assert_eq!(
            default_trait("access_level"),
            TraitValue::Text("2".to_string())
        );
        assert_eq!(
            default_trait("species"),
            TraitValue::Text("Unknown".to_string())
        );
        assert_eq!(
            default_trait("anything_else"),
            TraitValue::Text(String::new())
        );
    }

    #[test]
    fn test_csv_table_field_order() {
        let spec = spec_with("height,width", "m,m", "");
        let table = csv_traits_table(&spec);
        let expected: Vec<&str> = CSV_TRAIT_NAMES
            .iter()
            .copied()
            .chain(["height", "width"])
            .collect();
        assert_eq!(table.fields(), expected.as_slice());
    }

    #[test]
    fn test_citation_overrides_applied_when_declared() {
        let mut spec = spec_with("height", "m", "");
        spec.citation = Citation {
            author: "Zongyang, Li".to_string(),
            title: "Maricopa Field Station Data".to_string(),
            year: "2016".to_string(),
        };
        spec.method = "Scanner 3d ply data to height".to_string();

        let csv = csv_traits_table(&spec);
        let row = csv.row();
        let author_idx = csv.fields().iter().position(|f| f == "citation_author").unwrap();
        assert_eq!(row[author_idx], "Zongyang, Li");

        let bety = bety_traits_table(&spec);
        let row = bety.row();
        let method_idx = bety.fields().iter().position(|f| f == "method").unwrap();
        assert_eq!(row[method_idx], "Scanner 3d ply data to height");
    }

    #[test]
    fn test_undeclared_citation_keeps_defaults() {
        let spec = spec_with("height", "m", "");
        let bety = bety_traits_table(&spec);
        let row = bety.row();
        let fields = bety.fields();
        let get = |name: &str| {
            let idx = fields.iter().position(|f| f == name).unwrap();
            row[idx].clone()
        };
        assert_eq!(get("citation_author"), "\"Unknown\"");
        assert_eq!(get("citation_year"), "0000");
        assert_eq!(get("method"), "Unknown");
        assert_eq!(get("access_level"), "2");
        assert_eq!(get("site"), "[]");
    }

    #[test]
    fn test_geo_table_defaults_are_empty() {
        let table = geo_traits_table();
        assert_eq!(table.fields(), GEO_TRAIT_NAMES);
        assert!(table.row().iter().all(String::is_empty));
    }

    #[test]
    fn test_header_suffixes_label_and_unit() {
        let spec = spec_with("height,width", "m,cm", "Canopy Height,Canopy Width");
        let header = csv_header_fields(&spec);
        assert_eq!(header[CSV_TRAIT_NAMES.len()], "height Canopy Height (m)");
        assert_eq!(header[CSV_TRAIT_NAMES.len() + 1], "width Canopy Width (cm)");
    }

    #[test]
    fn test_header_short_unit_list_degrades() {
        let spec = spec_with("height,width", "m", "");
        let header = csv_header_fields(&spec);
        assert_eq!(header[CSV_TRAIT_NAMES.len()], "height (m)");
        assert_eq!(header[CSV_TRAIT_NAMES.len() + 1], "width");
    }

    #[test]
    fn test_row_falls_back_to_default_for_unset_field() {
        let spec = spec_with("height", "m", "");
        let mut table = csv_traits_table(&spec);
        table.set_text("germplasmName", "Sorghum bicolor");
        table.set("height", TraitValue::Number(1.25));

        let row = table.row();
        assert_eq!(row[0], "Sorghum bicolor");
        assert_eq!(row.last().unwrap(), "1.25");
        // site comes from the array default
        assert_eq!(row[1], "[]");
    }
}
