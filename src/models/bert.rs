// BERT encoder built from candle-nn layers
//
// Parameter names follow the Hugging Face BERT layout so pretrained
// safetensors load by name. Layer norm and softmax are composed from plain
// tensor ops so the whole graph is differentiable.

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{embedding, linear, Dropout, Embedding, Init, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

/// Feed-forward activation named in `config.json`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    #[default]
    Gelu,
    GeluNew,
    GeluPytorchTanh,
    Relu,
}

impl HiddenAct {
    fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            HiddenAct::Gelu => xs.gelu_erf(),
            HiddenAct::GeluNew | HiddenAct::GeluPytorchTanh => xs.gelu(),
            HiddenAct::Relu => xs.relu(),
        }
    }
}

fn default_model_type() -> String {
    "bert".to_string()
}

fn default_dropout() -> f64 {
    0.1
}

fn default_max_position_embeddings() -> usize {
    512
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

/// Architecture fields of a BERT `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f64,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f64,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default)]
    pub classifier_dropout: Option<f64>,
}

impl BertConfig {
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

/// Layer norm over the last dimension
#[derive(Debug, Clone)]
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn new(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
        let bias = vb.get_with_hints(size, "bias", Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mean = xs.mean_keepdim(D::Minus1)?;
        let centered = xs.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&var.affine(1.0, self.eps)?.sqrt()?)?;
        normed.broadcast_mul(&self.weight)?.broadcast_add(&self.bias)
    }
}

struct Embeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    layer_norm: LayerNorm,
    dropout: Dropout,
    max_positions: usize,
}

impl Embeddings {
    fn new(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            word_embeddings: embedding(
                config.vocab_size,
                config.hidden_size,
                vb.pp("word_embeddings"),
            )?,
            position_embeddings: embedding(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            token_type_embeddings: embedding(
                config.type_vocab_size,
                config.hidden_size,
                vb.pp("token_type_embeddings"),
            )?,
            layer_norm: LayerNorm::new(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("LayerNorm"),
            )?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
            max_positions: config.max_position_embeddings,
        })
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len > self.max_positions {
            candle_core::bail!(
                "sequence length {} exceeds max_position_embeddings {}",
                seq_len,
                self.max_positions
            );
        }

        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        let embeddings = self
            .word_embeddings
            .forward(input_ids)?
            .broadcast_add(&self.position_embeddings.forward(&positions)?)?
            .add(&self.token_type_embeddings.forward(token_type_ids)?)?;
        let embeddings = self.layer_norm.forward(&embeddings)?;
        self.dropout.forward(&embeddings, train)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    layer_norm: LayerNorm,
    attention_dropout: Dropout,
    output_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn new(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let hidden = config.hidden_size;
        let self_vb = vb.pp("self");
        let output_vb = vb.pp("output");
        Ok(Self {
            query: linear(hidden, hidden, self_vb.pp("query"))?,
            key: linear(hidden, hidden, self_vb.pp("key"))?,
            value: linear(hidden, hidden, self_vb.pp("value"))?,
            output: linear(hidden, hidden, output_vb.pp("dense"))?,
            layer_norm: LayerNorm::new(hidden, config.layer_norm_eps, output_vb.pp("LayerNorm"))?,
            attention_dropout: Dropout::new(config.attention_probs_dropout_prob as f32),
            output_dropout: Dropout::new(config.hidden_dropout_prob as f32),
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    fn split_heads(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, s, _) = xs.dims3()?;
        xs.reshape((b, s, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// `mask` is additive, shaped [b, 1, 1, s]
    fn forward(&self, hidden: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (b, s, h) = hidden.dims3()?;

        let q = self.split_heads(&self.query.forward(hidden)?)?;
        let k = self.split_heads(&self.key.forward(hidden)?)?;
        let v = self.split_heads(&self.value.forward(hidden)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(scale, 0.0)?
            .broadcast_add(mask)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let probs = self.attention_dropout.forward(&probs, train)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, s, h))?;

        let out = self.output.forward(&context)?;
        let out = self.output_dropout.forward(&out, train)?;
        self.layer_norm.forward(&out.add(hidden)?)
    }
}

struct FeedForward {
    intermediate: Linear,
    output: Linear,
    layer_norm: LayerNorm,
    dropout: Dropout,
    act: HiddenAct,
}

impl FeedForward {
    fn new(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        let output_vb = vb.pp("output");
        Ok(Self {
            intermediate: linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            output: linear(config.intermediate_size, config.hidden_size, output_vb.pp("dense"))?,
            layer_norm: LayerNorm::new(
                config.hidden_size,
                config.layer_norm_eps,
                output_vb.pp("LayerNorm"),
            )?,
            dropout: Dropout::new(config.hidden_dropout_prob as f32),
            act: config.hidden_act,
        })
    }

    fn forward(&self, hidden: &Tensor, train: bool) -> Result<Tensor> {
        let xs = self.act.apply(&self.intermediate.forward(hidden)?)?;
        let xs = self.dropout.forward(&self.output.forward(&xs)?, train)?;
        self.layer_norm.forward(&xs.add(hidden)?)
    }
}

struct Layer {
    attention: SelfAttention,
    feed_forward: FeedForward,
}

/// Embeddings, encoder layers and the `[CLS]` pooler
pub struct BertEncoder {
    embeddings: Embeddings,
    layers: Vec<Layer>,
    pooler: Linear,
}

impl BertEncoder {
    /// `vb` is rooted at the `bert` prefix
    pub fn new(config: &BertConfig, vb: VarBuilder) -> Result<Self> {
        if config.num_attention_heads == 0 || config.hidden_size % config.num_attention_heads != 0 {
            candle_core::bail!(
                "hidden_size {} is not divisible by num_attention_heads {}",
                config.hidden_size,
                config.num_attention_heads
            );
        }

        let embeddings = Embeddings::new(config, vb.pp("embeddings"))?;
        let layers_vb = vb.pp("encoder").pp("layer");
        let layers = (0..config.num_hidden_layers)
            .map(|i| {
                let layer_vb = layers_vb.pp(i.to_string());
                Ok(Layer {
                    attention: SelfAttention::new(config, layer_vb.pp("attention"))?,
                    feed_forward: FeedForward::new(config, layer_vb.clone())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let pooler = linear(config.hidden_size, config.hidden_size, vb.pp("pooler").pp("dense"))?;

        Ok(Self {
            embeddings,
            layers,
            pooler,
        })
    }

    /// Pooled `[CLS]` representation, [b, hidden]
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
        train: bool,
    ) -> Result<Tensor> {
        let (b, s) = attention_mask.dims2()?;
        // 0 for real tokens, -10000 for padding
        let mask = attention_mask
            .to_dtype(DType::F32)?
            .affine(10_000.0, -10_000.0)?
            .reshape((b, 1, 1, s))?;

        let mut hidden = self.embeddings.forward(input_ids, token_type_ids, train)?;
        for layer in &self.layers {
            hidden = layer.attention.forward(&hidden, &mask, train)?;
            hidden = layer.feed_forward.forward(&hidden, train)?;
        }

        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        self.pooler.forward(&cls)?.tanh()
    }
}
