//! Mapping of image-analysis results into prescription submissions
//!
//! The analysis provider returns a loosely typed list of medicines.
//! Missing optional fields become empty defaults here; nothing is
//! invented beyond that.

use serde::{Deserialize, Serialize};

use crate::models::{
    GroupId, NewPrescription, NewPrescriptionItem, PrescriptionStatus, TimeOfDay, TimesOfDay,
};

/// Response body of the image-analysis service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    #[serde(default)]
    pub medicines: Vec<AnalyzedMedicine>,
    #[serde(default)]
    pub raw_text: Option<String>,
}

/// One medicine entry as reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedMedicine {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_translated: Option<String>,
    #[serde(default)]
    pub dose: Option<String>,
    /// Single timing label, possibly a comma separated list
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub times: Option<Vec<String>>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub note_translated: Option<String>,
}

fn present(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AnalyzedMedicine {
    fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }

    fn times_of_day(&self) -> TimesOfDay {
        let single = self
            .time
            .iter()
            .flat_map(|t| t.split([',', '/', ' ']))
            .map(str::to_string);
        let listed = self.times.iter().flatten().cloned();
        single
            .chain(listed)
            .filter_map(|label| TimeOfDay::parse(&label))
            .collect()
    }

    /// Convert into an item payload; the repository assigns the id
    pub fn into_item(self) -> NewPrescriptionItem {
        let times_of_day = self.times_of_day();
        NewPrescriptionItem {
            id: None,
            drug_name_local: present(self.name).unwrap_or_default(),
            drug_name_translated: present(self.name_translated),
            dose: present(self.dose).unwrap_or_default(),
            times_of_day,
            note_local: present(self.note),
            note_translated: present(self.note_translated),
        }
    }
}

/// Build a submission for `care_target_id` from an analysis payload.
///
/// The record is `parsed` only when there is at least one medicine and
/// every medicine carries a drug name; anything else needs a manual fix.
pub fn to_new_prescription(
    payload: AnalysisPayload,
    care_target_id: GroupId,
    source_image_ref: Option<String>,
) -> NewPrescription {
    let complete = !payload.medicines.is_empty() && payload.medicines.iter().all(|m| m.has_name());
    NewPrescription {
        care_target_id,
        title: None,
        source_image_ref,
        status: if complete {
            PrescriptionStatus::Parsed
        } else {
            PrescriptionStatus::NeedsManualFix
        },
        raw_recognized_text: present(payload.raw_text),
        items: payload
            .medicines
            .into_iter()
            .map(AnalyzedMedicine::into_item)
            .collect(),
    }
}
