//! Hugging Face inference API adapter (text-to-image).

use serde_json::json;

use super::{Adapter, ProviderConfig, ProviderKind};
use crate::http::{OutboundRequest, RawResponse};
use crate::request::{Generated, Image, Payload};

pub const DEFAULT_MODEL: &str = "stabilityai/stable-diffusion-xl-base-1.0";

pub struct HuggingFaceAdapter;

impl HuggingFaceAdapter {
    fn model_url(provider: &ProviderConfig) -> String {
        let model = provider.model.as_deref().unwrap_or(DEFAULT_MODEL);
        provider.endpoint(&format!("models/{}", model))
    }
}

impl Adapter for HuggingFaceAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HuggingFace
    }

    fn build(
        &self,
        provider: &ProviderConfig,
        payload: &Payload,
    ) -> Result<OutboundRequest, String> {
        let Payload::Image(image) = payload else {
            return Err("huggingface providers only accept image payloads".to_string());
        };
        if image.is_img2img() {
            return Err("huggingface providers do not support image-to-image".to_string());
        }

        let mut parameters = json!({
            "num_inference_steps": image.steps,
            "guidance_scale": image.cfg_scale,
            "width": image.width,
            "height": image.height,
        });
        if let Some(negative) = &image.negative_prompt {
            parameters["negative_prompt"] = json!(negative);
        }
        if let Some(seed) = image.seed {
            parameters["seed"] = json!(seed);
        }

        let body = json!({"inputs": image.prompt, "parameters": parameters});

        Ok(
            OutboundRequest::post_json(Self::model_url(provider), body)
                .bearer(provider.credential.as_deref())
                .header("Accept", "image/png"),
        )
    }

    fn parse(&self, response: &RawResponse) -> Result<Generated, String> {
        let mime = response
            .content_type
            .as_deref()
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .unwrap_or_default();

        if !mime.starts_with("image/") {
            return Err(format!(
                "expected an image, got content type '{}'",
                if mime.is_empty() { "none" } else { mime }
            ));
        }
        if response.body.is_empty() {
            return Err("empty image body".to_string());
        }

        Ok(Generated::Images(vec![Image {
            mime: mime.to_string(),
            bytes: response.body.clone(),
        }]))
    }

    fn probe(&self, provider: &ProviderConfig) -> OutboundRequest {
        OutboundRequest::get(Self::model_url(provider)).bearer(provider.credential.as_deref())
    }
}
