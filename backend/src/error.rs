use crate::inference::InferenceError;
use crate::ingest::IngestError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use dermai_shared::ErrorResponse;

/// Upload problems detected before any model runs.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Nenhum arquivo de imagem enviado")]
    MissingImage,
    #[error("Arquivo sem nome")]
    EmptyFilename,
    #[error("Tipo de arquivo inválido (esperado imagem)")]
    InvalidMediaType,
    #[error("Arquivo excede o limite de {0} bytes")]
    TooLarge(usize),
    #[error("Requisição multipart inválida: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Erro na predição: {0}")]
    InvalidImage(#[from] IngestError),
    #[error("Erro na predição: {0}")]
    Inference(#[from] InferenceError),
    #[error("Erro na predição: {0}")]
    Internal(String),
}

impl From<actix_web::error::BlockingError> for PredictError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        PredictError::Internal(err.to_string())
    }
}

impl ResponseError for PredictError {
    fn status_code(&self) -> StatusCode {
        match self {
            PredictError::Validation(_) | PredictError::InvalidImage(IngestError::Decode(_)) => {
                StatusCode::BAD_REQUEST
            }
            PredictError::InvalidImage(_)
            | PredictError::Inference(_)
            | PredictError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
        })
    }
}
