use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Column holding the facility name. It is the only hospital column stored in
/// plaintext, so search and display can use it directly.
pub const DISPLAY_KEY: &str = "Facility_Name";

/// Every column of the hospitals table, in storage order.
pub const HOSPITAL_COLUMNS: [&str; 24] = [
    "Facility_Name",
    "Facility_City",
    "Facility_State",
    "Facility_Type",
    "Rating_Overall",
    "Rating_Mortality",
    "Rating_Safety",
    "Rating_Readmission",
    "Rating_Experience",
    "Rating_Effectiveness",
    "Rating_Timeliness",
    "Rating_Imaging",
    "Procedure_Heart_Attack_Cost",
    "Procedure_Heart_Attack_Quality",
    "Procedure_Heart_Attack_Value",
    "Procedure_Heart_Failure_Cost",
    "Procedure_Heart_Failure_Quality",
    "Procedure_Heart_Failure_Value",
    "Procedure_Pneumonia_Cost",
    "Procedure_Pneumonia_Quality",
    "Procedure_Pneumonia_Value",
    "Procedure_Hip_Knee_Cost",
    "Procedure_Hip_Knee_Quality",
    "Procedure_Hip_Knee_Value",
];

/// A hospital row as handed to clients: every column decrypted (where
/// possible) plus its 1-based position in the full result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalRecord {
    pub global_index: u64,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<String>>,
}

impl HospitalRecord {
    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(|v| v.as_deref())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.field(DISPLAY_KEY)
    }
}

/// One page of hospital records with its pagination metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<HospitalRecord>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_flat_with_global_index() {
        let mut fields = BTreeMap::new();
        fields.insert(DISPLAY_KEY.to_string(), Some("Mercy".to_string()));
        fields.insert("Facility_City".to_string(), None);
        let record = HospitalRecord { global_index: 51, fields };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "global_index": 51,
                "Facility_Name": "Mercy",
                "Facility_City": null,
            })
        );
        assert_eq!(record.display_name(), Some("Mercy"));
        assert_eq!(record.field("Facility_City"), None);
    }

    #[test]
    fn display_key_is_first_column() {
        assert_eq!(HOSPITAL_COLUMNS[0], DISPLAY_KEY);
    }
}
