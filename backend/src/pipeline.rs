use crate::error::PredictError;
use crate::inference::report::ReportComposer;
use crate::inference::{
    CancelOnDrop, Cancellation, CaptionGenerator, Classification, InferenceError,
    LesionClassifier,
};
use crate::ingest::{self, TransientImage};
use actix_web::web;
use dermai_shared::{PredictResponse, resolve_display_name};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Everything one request produces.
#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub classification: Classification,
    pub caption: String,
    pub report: String,
}

impl Diagnosis {
    pub fn display_name(&self) -> &str {
        resolve_display_name(self.classification.code.code())
    }

    pub fn diagnosis_line(&self) -> String {
        format!(
            "🔬 Diagnóstico: {} ({:.1}% de confiança)",
            self.classification.code,
            self.classification.confidence * 100.0
        )
    }

    pub fn description_block(&self) -> String {
        format!("📝 Descrição da Imagem:\n{}", self.caption)
    }

    pub fn into_response(self) -> PredictResponse {
        PredictResponse {
            diagnostico_text: self.diagnosis_line(),
            descricao_text: self.description_block(),
            laudo_text: self.report.trim().to_string(),
        }
    }
}

/// Models loaded at startup, shared read-only by every request.
#[derive(Clone)]
pub struct Pipeline {
    classifier: Arc<dyn LesionClassifier>,
    captioner: Arc<dyn CaptionGenerator>,
    composer: ReportComposer,
    scratch_dir: PathBuf,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        classifier: Arc<dyn LesionClassifier>,
        captioner: Arc<dyn CaptionGenerator>,
        composer: ReportComposer,
        scratch_dir: PathBuf,
        request_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            captioner,
            composer,
            scratch_dir,
            request_timeout,
        }
    }

    /// Decodes the upload, runs the three models and removes the transient
    /// file before returning, whatever the outcome. Blocking model jobs still
    /// running when the request ends (timeout, failure, dropped future) are
    /// told to stop.
    pub async fn run(&self, bytes: Vec<u8>) -> Result<Diagnosis, PredictError> {
        let cancel = Cancellation::default();
        let _stop_jobs = CancelOnDrop(cancel.clone());

        let scratch_dir = self.scratch_dir.clone();
        let image: TransientImage =
            web::block(move || ingest::ingest(&bytes, &scratch_dir)).await??;
        log::debug!("Stored upload at {}", image.path().display());

        let outcome = tokio::time::timeout(
            self.request_timeout,
            self.analyze(image.path(), &cancel),
        )
        .await;
        drop(image);

        match outcome {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(InferenceError::Timeout(self.request_timeout).into())
            }
        }
    }

    async fn analyze(&self, image: &Path, cancel: &Cancellation) -> Result<Diagnosis, PredictError> {
        let classify = {
            let classifier = self.classifier.clone();
            let path = image.to_path_buf();
            async move { Ok::<_, PredictError>(web::block(move || classifier.classify(&path)).await??) }
        };
        let caption = {
            let captioner = self.captioner.clone();
            let path = image.to_path_buf();
            let cancel = cancel.clone();
            async move {
                Ok::<_, PredictError>(web::block(move || captioner.caption(&path, &cancel)).await??)
            }
        };

        let (classification, caption) = futures::try_join!(classify, caption)?;
        log::info!(
            "Classified lesion as {} ({:.1}%)",
            classification.code,
            classification.confidence * 100.0
        );

        let diagnosis = resolve_display_name(classification.code.code());
        let report = self
            .composer
            .compose(&caption, diagnosis, classification.confidence)
            .await?;

        Ok(Diagnosis {
            classification,
            caption,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dermai_shared::LabelCode;

    fn diagnosis(confidence: f32) -> Diagnosis {
        Diagnosis {
            classification: Classification {
                code: LabelCode::Bcc,
                confidence,
            },
            caption: "pápula perolada".into(),
            report: "  Laudo final. \n".into(),
        }
    }

    #[test]
    fn diagnosis_line_uses_code_and_one_decimal_percentage() {
        assert_eq!(
            diagnosis(0.91234).diagnosis_line(),
            "🔬 Diagnóstico: BCC (91.2% de confiança)"
        );
        assert_eq!(
            diagnosis(1.0).diagnosis_line(),
            "🔬 Diagnóstico: BCC (100.0% de confiança)"
        );
    }

    #[test]
    fn response_groups_the_three_texts() {
        let d = diagnosis(0.5);
        assert_eq!(d.display_name(), "Basal Cell Carcinoma (carcinoma basocelular)");
        let response = d.into_response();
        assert_eq!(response.descricao_text, "📝 Descrição da Imagem:\npápula perolada");
        assert_eq!(response.laudo_text, "Laudo final.");
    }
}
