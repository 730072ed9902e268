use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

/// Response body of a successful `POST /predict`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PredictResponse {
    pub diagnostico_text: String,
    pub descricao_text: String,
    pub laudo_text: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

/// The eight lesion categories the classifier can emit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, IntoStaticStr,
)]
pub enum LabelCode {
    #[strum(serialize = "AK")]
    Ak,
    #[strum(serialize = "BCC")]
    Bcc,
    #[strum(serialize = "BKL")]
    Bkl,
    #[strum(serialize = "DF")]
    Df,
    #[strum(serialize = "MEL")]
    Mel,
    #[strum(serialize = "NV")]
    Nv,
    #[strum(serialize = "SCC")]
    Scc,
    #[strum(serialize = "VASC")]
    Vasc,
}

impl LabelCode {
    pub fn code(&self) -> &'static str {
        self.into()
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            LabelCode::Ak => "Actinic Keratosis (ceratose actínica)",
            LabelCode::Bcc => "Basal Cell Carcinoma (carcinoma basocelular)",
            LabelCode::Bkl => "Benign Keratosis‑Like Lesion (lesão queratósica benigna)",
            LabelCode::Df => "Dermatofibroma",
            LabelCode::Mel => "Melanoma",
            LabelCode::Nv => "Melanocytic Nevus (nevo melanocítico)",
            LabelCode::Scc => "Squamous Cell Carcinoma (carcinoma de células escamosas)",
            LabelCode::Vasc => "Vascular Lesion (lesão vascular)",
        }
    }
}

lazy_static! {
    /// Short code to human-readable diagnosis.
    pub static ref LABEL_CATALOG: HashMap<&'static str, &'static str> = LabelCode::iter()
        .map(|label| (label.code(), label.display_name()))
        .collect();
}

/// Looks up the display name for a raw label code, returning the code itself
/// when the catalog has no entry for it.
pub fn resolve_display_name(code: &str) -> &str {
    LABEL_CATALOG.get(code).copied().unwrap_or(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn catalog_covers_every_label() {
        assert_eq!(LABEL_CATALOG.len(), 8);
        for label in LabelCode::iter() {
            assert_eq!(resolve_display_name(label.code()), label.display_name());
        }
    }

    #[test]
    fn codes_parse_from_their_short_form() {
        assert_eq!(LabelCode::from_str("MEL").unwrap(), LabelCode::Mel);
        assert_eq!(LabelCode::from_str("VASC").unwrap(), LabelCode::Vasc);
        assert_eq!(LabelCode::Bkl.to_string(), "BKL");
        assert!(LabelCode::from_str("mel").is_err());
    }

    #[test]
    fn unknown_code_resolves_to_itself() {
        assert_eq!(resolve_display_name("XYZ"), "XYZ");
        assert_eq!(resolve_display_name("MEL"), "Melanoma");
    }

    #[test]
    fn predict_response_uses_wire_field_names() {
        let response = PredictResponse {
            diagnostico_text: "a".into(),
            descricao_text: "b".into(),
            laudo_text: "c".into(),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["diagnostico_text"], "a");
        assert_eq!(value["descricao_text"], "b");
        assert_eq!(value["laudo_text"], "c");
    }
}
