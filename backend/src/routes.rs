use crate::error::{PredictError, ValidationError};
use crate::pipeline::Pipeline;
use actix_multipart::{Field, Multipart};
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};

const IMAGE_FIELD: &str = "image";

/// Largest accepted upload, in bytes.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimit(pub usize);

/// An image part pulled out of the multipart body.
#[derive(Debug)]
pub struct UploadedImage {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/predict").route(web::post().to(predict)));
}

async fn home() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Derm AI API is running!")
}

async fn predict(
    pipeline: web::Data<Pipeline>,
    limit: web::Data<UploadLimit>,
    payload: Multipart,
) -> Result<HttpResponse, PredictError> {
    let upload = read_image_field(payload, limit.0).await.map_err(|e| {
        log::warn!("Rejected upload: {}", e);
        e
    })?;
    log::debug!(
        "Received {} ({}, {} bytes)",
        upload.filename,
        upload.content_type,
        upload.bytes.len()
    );

    match pipeline.run(upload.bytes).await {
        Ok(diagnosis) => Ok(HttpResponse::Ok().json(diagnosis.into_response())),
        Err(e) => {
            log::error!("Prediction failed: {}", e);
            Err(e)
        }
    }
}

/// Finds the `image` part and validates its headers before reading the body.
async fn read_image_field(
    mut payload: Multipart,
    max_bytes: usize,
) -> Result<UploadedImage, PredictError> {
    loop {
        // Until the image part is found, an unreadable body (not multipart,
        // no boundary) means no image was sent.
        let field = match payload.try_next().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                log::debug!("Multipart body unreadable before image part: {}", e);
                break;
            }
        };
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(filename) = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_string)
        else {
            // A part without a filename is a plain form value, not a file.
            continue;
        };
        if filename.is_empty() {
            return Err(ValidationError::EmptyFilename.into());
        }
        let content_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .filter(|essence| essence.starts_with("image/"))
            .ok_or(ValidationError::InvalidMediaType)?;

        let bytes = read_field(field, max_bytes).await?;
        return Ok(UploadedImage {
            filename,
            content_type,
            bytes,
        });
    }

    Err(ValidationError::MissingImage.into())
}

async fn read_field(mut field: Field, max_bytes: usize) -> Result<Vec<u8>, PredictError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let data = chunk.map_err(|e| ValidationError::Malformed(e.to_string()))?;
        if bytes.len() + data.len() > max_bytes {
            return Err(ValidationError::TooLarge(max_bytes).into());
        }
        bytes.extend_from_slice(&data);
    }
    Ok(bytes)
}
