use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use serde::Serialize;
use serde_json::{json, Value};

/// Positive-prompt hole in workflow graphs. Substitution is the
/// orchestrator's responsibility; the agent ships graphs verbatim.
pub const POSITIVE_PROMPT_SENTINEL: &str = "{{POSITIVE_PROMPT}}";
pub const NEGATIVE_PROMPT_SENTINEL: &str = "{{NEGATIVE_PROMPT}}";
pub const SEED_SENTINEL: &str = "{{SEED}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Text2Video,
    Image2Video,
    Text2Image,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Sampler parameters shared by the two-stage wan pipelines.
#[derive(Debug, Clone, Serialize)]
pub struct SamplerConfig {
    pub steps: u32,
    pub cfg: f64,
    pub sampler_name: &'static str,
    pub scheduler: &'static str,
    pub shift: f64,
}

/// One supported RENDER pipeline: metadata, required model files per slot,
/// and the parameterised submission graph.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub kind: WorkflowKind,
    pub resolution: Resolution,
    pub fps: u32,
    pub frames: u32,
    /// Slot name → required model file name.
    pub models: BTreeMap<&'static str, &'static str>,
    pub sampler: SamplerConfig,
    pub graph: Value,
}

/// Compact listing row for `/workflows`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSummary {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub kind: WorkflowKind,
    pub resolution: Resolution,
    pub fps: u32,
    pub frames: u32,
    pub models: BTreeMap<&'static str, &'static str>,
    pub node_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotReadiness {
    pub name: String,
    pub available: bool,
}

/// Readiness of one workflow against the observed RENDER catalog.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReadiness {
    pub all_available: bool,
    pub slots: BTreeMap<String, SlotReadiness>,
}

impl WorkflowSpec {
    pub fn summary(&self) -> WorkflowSummary {
        WorkflowSummary {
            id: self.id,
            name: self.name,
            description: self.description,
            kind: self.kind,
            resolution: self.resolution,
            fps: self.fps,
            frames: self.frames,
            models: self.models.clone(),
            node_count: self.node_count(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.as_object().map(|g| g.len()).unwrap_or(0)
    }

    /// A workflow is ready when every required file name appears in the
    /// union of the observed catalog's slot lists.
    pub fn readiness(&self, observed: &BTreeSet<String>) -> WorkflowReadiness {
        let slots: BTreeMap<String, SlotReadiness> = self
            .models
            .iter()
            .map(|(slot, file)| {
                (
                    slot.to_string(),
                    SlotReadiness {
                        name: file.to_string(),
                        available: observed.contains(*file),
                    },
                )
            })
            .collect();

        WorkflowReadiness {
            all_available: slots.values().all(|s| s.available),
            slots,
        }
    }
}

/// The built-in pipeline table. Frozen at compile time; config can hide
/// entries from capabilities but never alter them.
pub fn registry() -> &'static [WorkflowSpec] {
    static REGISTRY: OnceLock<Vec<WorkflowSpec>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

pub fn find(id: &str) -> Option<&'static WorkflowSpec> {
    registry().iter().find(|w| w.id == id)
}

fn build_registry() -> Vec<WorkflowSpec> {
    vec![wan22_t2v(), wan22_i2v(), wan22_t2i()]
}

const WAN22_T2V_HIGH: &str = "wan2.2_t2v_high_noise_14B_fp8_scaled.safetensors";
const WAN22_T2V_LOW: &str = "wan2.2_t2v_low_noise_14B_fp8_scaled.safetensors";
const WAN22_I2V_HIGH: &str = "wan2.2_i2v_high_noise_14B_fp8_scaled.safetensors";
const WAN22_I2V_LOW: &str = "wan2.2_i2v_low_noise_14B_fp8_scaled.safetensors";
const WAN_VAE: &str = "wan_2.1_vae.safetensors";
const WAN_TEXT_ENCODER: &str = "umt5_xxl_fp8_e4m3fn_scaled.safetensors";
const WAN22_T2V_LORA_HIGH: &str = "wan2.2_t2v_lightx2v_4steps_lora_v1.1_high_noise.safetensors";
const WAN22_T2V_LORA_LOW: &str = "wan2.2_t2v_lightx2v_4steps_lora_v1.1_low_noise.safetensors";
const WAN22_I2V_LORA_HIGH: &str = "wan2.2_i2v_lightx2v_4steps_lora_high_noise.safetensors";
const WAN22_I2V_LORA_LOW: &str = "wan2.2_i2v_lightx2v_4steps_lora_low_noise.safetensors";

fn wan_sampler() -> SamplerConfig {
    SamplerConfig {
        steps: 4,
        cfg: 1.0,
        sampler_name: "euler",
        scheduler: "simple",
        shift: 5.0,
    }
}

fn wan22_t2v() -> WorkflowSpec {
    let resolution = Resolution {
        width: 832,
        height: 480,
    };
    let frames = 65;

    WorkflowSpec {
        id: "wan2.2_14B_t2v",
        name: "Wan 2.2 14B Text-to-Video",
        description: "Two-stage high/low-noise text-to-video with lightning LoRAs",
        kind: WorkflowKind::Text2Video,
        resolution,
        fps: 16,
        frames,
        models: BTreeMap::from([
            ("diffusion_high", WAN22_T2V_HIGH),
            ("diffusion_low", WAN22_T2V_LOW),
            ("vae", WAN_VAE),
            ("encoder", WAN_TEXT_ENCODER),
            ("lora_high", WAN22_T2V_LORA_HIGH),
            ("lora_low", WAN22_T2V_LORA_LOW),
        ]),
        sampler: wan_sampler(),
        graph: json!({
            "37": {
                "class_type": "UNETLoader",
                "inputs": {"unet_name": WAN22_T2V_HIGH, "weight_dtype": "default"}
            },
            "56": {
                "class_type": "UNETLoader",
                "inputs": {"unet_name": WAN22_T2V_LOW, "weight_dtype": "default"}
            },
            "38": {
                "class_type": "CLIPLoader",
                "inputs": {"clip_name": WAN_TEXT_ENCODER, "type": "wan", "device": "default"}
            },
            "39": {
                "class_type": "VAELoader",
                "inputs": {"vae_name": WAN_VAE}
            },
            "54": {
                "class_type": "LoraLoaderModelOnly",
                "inputs": {"lora_name": WAN22_T2V_LORA_HIGH, "strength_model": 1.0, "model": ["37", 0]}
            },
            "55": {
                "class_type": "LoraLoaderModelOnly",
                "inputs": {"lora_name": WAN22_T2V_LORA_LOW, "strength_model": 1.0, "model": ["56", 0]}
            },
            "48": {
                "class_type": "ModelSamplingSD3",
                "inputs": {"shift": 5.0, "model": ["54", 0]}
            },
            "49": {
                "class_type": "ModelSamplingSD3",
                "inputs": {"shift": 5.0, "model": ["55", 0]}
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": POSITIVE_PROMPT_SENTINEL, "clip": ["38", 0]}
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": NEGATIVE_PROMPT_SENTINEL, "clip": ["38", 0]}
            },
            "40": {
                "class_type": "EmptyHunyuanLatentVideo",
                "inputs": {"width": resolution.width, "height": resolution.height, "length": frames, "batch_size": 1}
            },
            "57": {
                "class_type": "KSamplerAdvanced",
                "inputs": {
                    "add_noise": "enable",
                    "noise_seed": SEED_SENTINEL,
                    "steps": 4,
                    "cfg": 1.0,
                    "sampler_name": "euler",
                    "scheduler": "simple",
                    "start_at_step": 0,
                    "end_at_step": 2,
                    "return_with_leftover_noise": "enable",
                    "model": ["48", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["40", 0]
                }
            },
            "58": {
                "class_type": "KSamplerAdvanced",
                "inputs": {
                    "add_noise": "disable",
                    "noise_seed": SEED_SENTINEL,
                    "steps": 4,
                    "cfg": 1.0,
                    "sampler_name": "euler",
                    "scheduler": "simple",
                    "start_at_step": 2,
                    "end_at_step": 4,
                    "return_with_leftover_noise": "disable",
                    "model": ["49", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["57", 0]
                }
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": {"samples": ["58", 0], "vae": ["39", 0]}
            },
            "50": {
                "class_type": "SaveAnimatedWEBP",
                "inputs": {"images": ["8", 0], "fps": 16, "filename_prefix": "wan22_t2v", "lossless": false, "quality": 90, "method": "default"}
            }
        }),
    }
}

fn wan22_i2v() -> WorkflowSpec {
    let resolution = Resolution {
        width: 832,
        height: 480,
    };
    let frames = 65;

    WorkflowSpec {
        id: "wan2.2_14B_i2v",
        name: "Wan 2.2 14B Image-to-Video",
        description: "Two-stage high/low-noise image-to-video animation",
        kind: WorkflowKind::Image2Video,
        resolution,
        fps: 16,
        frames,
        models: BTreeMap::from([
            ("diffusion_high", WAN22_I2V_HIGH),
            ("diffusion_low", WAN22_I2V_LOW),
            ("vae", WAN_VAE),
            ("encoder", WAN_TEXT_ENCODER),
            ("lora_high", WAN22_I2V_LORA_HIGH),
            ("lora_low", WAN22_I2V_LORA_LOW),
        ]),
        sampler: wan_sampler(),
        graph: json!({
            "37": {
                "class_type": "UNETLoader",
                "inputs": {"unet_name": WAN22_I2V_HIGH, "weight_dtype": "default"}
            },
            "56": {
                "class_type": "UNETLoader",
                "inputs": {"unet_name": WAN22_I2V_LOW, "weight_dtype": "default"}
            },
            "38": {
                "class_type": "CLIPLoader",
                "inputs": {"clip_name": WAN_TEXT_ENCODER, "type": "wan", "device": "default"}
            },
            "39": {
                "class_type": "VAELoader",
                "inputs": {"vae_name": WAN_VAE}
            },
            "54": {
                "class_type": "LoraLoaderModelOnly",
                "inputs": {"lora_name": WAN22_I2V_LORA_HIGH, "strength_model": 1.0, "model": ["37", 0]}
            },
            "55": {
                "class_type": "LoraLoaderModelOnly",
                "inputs": {"lora_name": WAN22_I2V_LORA_LOW, "strength_model": 1.0, "model": ["56", 0]}
            },
            "62": {
                "class_type": "LoadImage",
                "inputs": {"image": "input.png"}
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": POSITIVE_PROMPT_SENTINEL, "clip": ["38", 0]}
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": NEGATIVE_PROMPT_SENTINEL, "clip": ["38", 0]}
            },
            "63": {
                "class_type": "WanImageToVideo",
                "inputs": {
                    "width": resolution.width,
                    "height": resolution.height,
                    "length": frames,
                    "batch_size": 1,
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "vae": ["39", 0],
                    "start_image": ["62", 0]
                }
            },
            "57": {
                "class_type": "KSamplerAdvanced",
                "inputs": {
                    "add_noise": "enable",
                    "noise_seed": SEED_SENTINEL,
                    "steps": 4,
                    "cfg": 1.0,
                    "sampler_name": "euler",
                    "scheduler": "simple",
                    "start_at_step": 0,
                    "end_at_step": 2,
                    "return_with_leftover_noise": "enable",
                    "model": ["54", 0],
                    "positive": ["63", 0],
                    "negative": ["63", 1],
                    "latent_image": ["63", 2]
                }
            },
            "58": {
                "class_type": "KSamplerAdvanced",
                "inputs": {
                    "add_noise": "disable",
                    "noise_seed": SEED_SENTINEL,
                    "steps": 4,
                    "cfg": 1.0,
                    "sampler_name": "euler",
                    "scheduler": "simple",
                    "start_at_step": 2,
                    "end_at_step": 4,
                    "return_with_leftover_noise": "disable",
                    "model": ["55", 0],
                    "positive": ["63", 0],
                    "negative": ["63", 1],
                    "latent_image": ["57", 0]
                }
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": {"samples": ["58", 0], "vae": ["39", 0]}
            },
            "50": {
                "class_type": "SaveAnimatedWEBP",
                "inputs": {"images": ["8", 0], "fps": 16, "filename_prefix": "wan22_i2v", "lossless": false, "quality": 90, "method": "default"}
            }
        }),
    }
}

fn wan22_t2i() -> WorkflowSpec {
    let resolution = Resolution {
        width: 1024,
        height: 1024,
    };

    WorkflowSpec {
        id: "wan2.2_14B_t2i",
        name: "Wan 2.2 14B Text-to-Image",
        description: "Single-frame still generation with the low-noise unit",
        kind: WorkflowKind::Text2Image,
        resolution,
        fps: 1,
        frames: 1,
        models: BTreeMap::from([
            ("diffusion_low", WAN22_T2V_LOW),
            ("vae", WAN_VAE),
            ("encoder", WAN_TEXT_ENCODER),
            ("lora_low", WAN22_T2V_LORA_LOW),
        ]),
        sampler: wan_sampler(),
        graph: json!({
            "56": {
                "class_type": "UNETLoader",
                "inputs": {"unet_name": WAN22_T2V_LOW, "weight_dtype": "default"}
            },
            "38": {
                "class_type": "CLIPLoader",
                "inputs": {"clip_name": WAN_TEXT_ENCODER, "type": "wan", "device": "default"}
            },
            "39": {
                "class_type": "VAELoader",
                "inputs": {"vae_name": WAN_VAE}
            },
            "55": {
                "class_type": "LoraLoaderModelOnly",
                "inputs": {"lora_name": WAN22_T2V_LORA_LOW, "strength_model": 1.0, "model": ["56", 0]}
            },
            "49": {
                "class_type": "ModelSamplingSD3",
                "inputs": {"shift": 5.0, "model": ["55", 0]}
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": POSITIVE_PROMPT_SENTINEL, "clip": ["38", 0]}
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": {"text": NEGATIVE_PROMPT_SENTINEL, "clip": ["38", 0]}
            },
            "40": {
                "class_type": "EmptyHunyuanLatentVideo",
                "inputs": {"width": resolution.width, "height": resolution.height, "length": 1, "batch_size": 1}
            },
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": SEED_SENTINEL,
                    "steps": 4,
                    "cfg": 1.0,
                    "sampler_name": "euler",
                    "scheduler": "simple",
                    "denoise": 1.0,
                    "model": ["49", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["40", 0]
                }
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": {"samples": ["3", 0], "vae": ["39", 0]}
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": {"images": ["8", 0], "filename_prefix": "wan22_t2i"}
            }
        }),
    }
}
