//! Stable Diffusion web UI (AUTOMATIC1111 API) adapter.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;

use super::{Adapter, ProviderConfig, ProviderKind};
use crate::http::{OutboundRequest, RawResponse};
use crate::request::{Generated, Image, Payload};

const SAMPLER: &str = "DPM++ 2M Karras";

/// img2img strength used when the payload does not set one
pub const DEFAULT_DENOISING_STRENGTH: f64 = 0.46;

mod api {
    use serde::Deserialize;

    /// Body of both txt2img and img2img responses
    #[derive(Deserialize, Debug)]
    pub struct ImagesResponse {
        #[serde(default)]
        pub images: Vec<String>,
    }
}

pub struct WebUiAdapter;

impl Adapter for WebUiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::WebUi
    }

    fn build(
        &self,
        provider: &ProviderConfig,
        payload: &Payload,
    ) -> Result<OutboundRequest, String> {
        let Payload::Image(image) = payload else {
            return Err("webui providers only accept image payloads".to_string());
        };

        let mut body = json!({
            "prompt": image.prompt,
            "negative_prompt": image.negative_prompt.as_deref().unwrap_or_default(),
            "steps": image.steps,
            "cfg_scale": image.cfg_scale,
            "width": image.width,
            "height": image.height,
            "sampler_name": SAMPLER,
            "batch_size": 1,
            "n_iter": 1,
            "seed": image.seed.unwrap_or(-1),
        });

        if let Some(checkpoint) = &provider.model {
            body["override_settings"] = json!({"sd_model_checkpoint": checkpoint});
            body["override_settings_restore_afterwards"] = json!(true);
        }

        let path = match &image.init_image {
            Some(init) => {
                body["init_images"] = json!([init]);
                body["denoising_strength"] = json!(
                    image
                        .denoising_strength
                        .unwrap_or(DEFAULT_DENOISING_STRENGTH)
                );
                "sdapi/v1/img2img"
            }
            None => "sdapi/v1/txt2img",
        };

        Ok(OutboundRequest::post_json(provider.endpoint(path), body)
            .bearer(provider.credential.as_deref()))
    }

    fn parse(&self, response: &RawResponse) -> Result<Generated, String> {
        let parsed: api::ImagesResponse = serde_json::from_slice(&response.body)
            .map_err(|e| format!("invalid image response body: {}", e))?;

        if parsed.images.is_empty() {
            return Err("no image generated".to_string());
        }

        let images = parsed
            .images
            .iter()
            .map(|encoded| {
                // Some builds prefix the payload with a data URL header.
                let data = encoded
                    .split_once(',')
                    .map(|(_, data)| data)
                    .unwrap_or(encoded.as_str());
                STANDARD
                    .decode(data)
                    .map(|bytes| Image {
                        mime: "image/png".to_string(),
                        bytes,
                    })
                    .map_err(|e| format!("image is not valid base64: {}", e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Generated::Images(images))
    }

    fn probe(&self, provider: &ProviderConfig) -> OutboundRequest {
        OutboundRequest::get(provider.endpoint("sdapi/v1/sd-models"))
            .bearer(provider.credential.as_deref())
    }
}
