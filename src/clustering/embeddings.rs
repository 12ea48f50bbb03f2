// Sentence embeddings for feedback text using all-MiniLM-L6-v2.
//
// Each feedback item is embedded into a 384-dimensional vector using a
// sentence transformer run locally via ONNX. Mean pooling is applied to the
// token embeddings and the result is L2-normalized, matching the
// sentence-transformers pipeline the model was published with. Unit-length
// vectors make Euclidean k-means behave like clustering by cosine distance.
//
// Loading the model is the slow part, so the loaded instance lives in a
// process-wide OnceCell and is shared by every run.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::error::ModelError;
use super::normalize::normalize;
use super::traits::Embedder;

/// Embedding dimension for all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Word pieces kept per text; the model was trained with this cap.
const MAX_SEQUENCE_LENGTH: usize = 256;

/// Texts per ONNX run. Keeps the hidden-state buffer bounded for large
/// feedback sets.
const INFERENCE_BATCH_SIZE: usize = 64;

/// Sentence embedder using a local ONNX model.
///
/// Arc<Mutex<Session>> because Session::run takes &mut self and inference
/// runs on spawn_blocking threads.
pub struct SentenceEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

impl SentenceEmbedder {
    /// Load the sentence embedding model and tokenizer from the given directory.
    ///
    /// Expects `model.onnx` and `tokenizer.json` in the directory.
    /// Call `download_model()` first if they don't exist.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        if !model_path.exists() {
            anyhow::bail!(
                "Embedding model not found: {}\nRun `chaff download-model` to download it.",
                model_path.display()
            );
        }
        if !tokenizer_path.exists() {
            anyhow::bail!(
                "Embedding tokenizer not found: {}\nRun `chaff download-model` to download it.",
                tokenizer_path.display()
            );
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| {
                format!(
                    "Failed to load embedding model from {}",
                    model_path.display()
                )
            })?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load embedding tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure tokenizer truncation: {}", e))?;

        debug!(
            "Loaded sentence embedding model from {}",
            model_dir.display()
        );

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
        })
    }

    /// Embed a batch of texts into unit-length vectors.
    ///
    /// CPU-bound work is offloaded to spawn_blocking to keep the async
    /// runtime responsive.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut embeddings = Vec::with_capacity(texts.len());
            for chunk in texts.chunks(INFERENCE_BATCH_SIZE) {
                embeddings.extend(embed_sync(&session, &tokenizer, chunk)?);
            }
            Ok(embeddings)
        })
        .await
        .context("spawn_blocking panicked")?
    }
}

/// Synchronous embedding: tokenize, run the model, pool.
fn embed_sync(
    session: &Arc<Mutex<Session>>,
    tokenizer: &Arc<Tokenizer>,
    texts: &[String],
) -> Result<Vec<Vec<f64>>> {
    let encodings: Vec<_> = texts
        .iter()
        .map(|t| {
            tokenizer
                .encode(t.as_str(), true)
                .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))
        })
        .collect::<Result<Vec<_>>>()?;

    let batch_size = encodings.len();
    let max_len = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0);

    if max_len == 0 {
        return Ok(vec![vec![0.0; EMBEDDING_DIM]; batch_size]);
    }

    // Build padded input tensors. BERT uses:
    //   input_ids: token IDs (pad with 0)
    //   attention_mask: 1 for real tokens, 0 for padding
    //   token_type_ids: all zeros for single-sentence input
    let mut input_ids_flat: Vec<i64> = Vec::with_capacity(batch_size * max_len);
    let mut attention_mask_flat: Vec<i64> = Vec::with_capacity(batch_size * max_len);
    let mut token_type_ids_flat: Vec<i64> = Vec::with_capacity(batch_size * max_len);

    for enc in &encodings {
        let ids = enc.get_ids();
        let mask = enc.get_attention_mask();
        let pad_len = max_len - ids.len();

        input_ids_flat.extend(ids.iter().map(|&id| id as i64));
        attention_mask_flat.extend(mask.iter().map(|&m| m as i64));
        token_type_ids_flat.extend(std::iter::repeat_n(0i64, ids.len()));

        input_ids_flat.extend(std::iter::repeat_n(0i64, pad_len));
        attention_mask_flat.extend(std::iter::repeat_n(0i64, pad_len));
        token_type_ids_flat.extend(std::iter::repeat_n(0i64, pad_len));
    }

    let shape = [batch_size as i64, max_len as i64];

    let input_ids_tensor =
        Tensor::from_array((shape, input_ids_flat)).context("Failed to create input_ids tensor")?;
    let attention_mask_tensor = Tensor::from_array((shape, attention_mask_flat.clone()))
        .context("Failed to create attention_mask tensor")?;
    let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids_flat))
        .context("Failed to create token_type_ids tensor")?;

    // Output is last_hidden_state: [batch, seq_len, dim]
    let hidden_states = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow::anyhow!("Session lock poisoned: {}", e))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor
            })
            .context("Embedding ONNX inference failed")?;

        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to extract embedding output tensor")?;

        data.to_vec()
    };

    let tokens = batch_size * max_len;
    if hidden_states.is_empty() || hidden_states.len() % tokens != 0 {
        anyhow::bail!(
            "Unexpected embedding output size {} for {} tokens",
            hidden_states.len(),
            tokens
        );
    }
    let dim = hidden_states.len() / tokens;

    let mut embeddings = mean_pool(&hidden_states, &attention_mask_flat, batch_size, max_len, dim);
    for embedding in &mut embeddings {
        l2_normalize(embedding);
    }

    debug!(batch_size, dim, "Computed sentence embeddings");

    Ok(embeddings)
}

/// Average token embeddings weighted by the attention mask.
///
/// `hidden` is `[batch, seq_len, dim]` flattened, `mask` is `[batch, seq_len]`.
/// A row whose mask is all zero pools to the zero vector.
pub fn mean_pool(
    hidden: &[f32],
    mask: &[i64],
    batch_size: usize,
    seq_len: usize,
    dim: usize,
) -> Vec<Vec<f64>> {
    let mut pooled = Vec::with_capacity(batch_size);

    for i in 0..batch_size {
        let mut sum = vec![0.0_f64; dim];
        let mut mask_sum = 0.0_f64;

        for j in 0..seq_len {
            let mask_val = mask[i * seq_len + j] as f64;
            if mask_val > 0.0 {
                mask_sum += mask_val;
                let offset = (i * seq_len + j) * dim;
                for (k, acc) in sum.iter_mut().enumerate() {
                    *acc += hidden[offset + k] as f64 * mask_val;
                }
            }
        }

        if mask_sum > 0.0 {
            for val in &mut sum {
                *val /= mask_sum;
            }
        }

        pooled.push(sum);
    }

    pooled
}

/// Scale a vector to unit length. The zero vector is left as is.
pub fn l2_normalize(vector: &mut [f64]) {
    let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > f64::EPSILON {
        for val in vector.iter_mut() {
            *val /= norm;
        }
    }
}

/// The process-wide model. Set once by the first successful load; a
/// failed load leaves it empty so a later call can try again.
static SHARED_MODEL: OnceCell<SentenceEmbedder> = OnceCell::const_new();

/// Embedder backed by the process-wide ONNX model, loaded on first use.
///
/// Concurrent first callers wait on the same initialization, so the model
/// is constructed exactly once per process. The first successful load wins;
/// later instances pointing at another directory reuse it.
pub struct SharedEmbedder {
    model_dir: PathBuf,
}

impl SharedEmbedder {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
        }
    }

    /// Whether this process has already loaded the model.
    pub fn is_loaded() -> bool {
        SHARED_MODEL.initialized()
    }

    async fn model(&self) -> Result<&'static SentenceEmbedder> {
        load_once(&SHARED_MODEL, &self.model_dir, SentenceEmbedder::load).await
    }
}

/// Fill `cell` by running `load` on a blocking thread, unless it is already
/// set. Callers that arrive while a load is running wait for it instead of
/// starting their own. An error leaves the cell empty.
async fn load_once<'a, T, F>(cell: &'a OnceCell<T>, model_dir: &Path, load: F) -> Result<&'a T>
where
    T: Send + Sync + 'static,
    F: FnOnce(&Path) -> Result<T> + Send + 'static,
{
    cell.get_or_try_init(|| async {
        let dir = model_dir.to_path_buf();
        info!(model_dir = %dir.display(), "Loading sentence embedding model");
        let loaded = tokio::task::spawn_blocking(move || load(&dir))
            .await
            .context("Model loading task panicked")??;
        info!("Sentence embedding model loaded");
        Ok::<_, anyhow::Error>(loaded)
    })
    .await
}

#[async_trait]
impl Embedder for SharedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let model = self.model().await?;
        model.embed_batch(texts).await
    }
}

/// Normalize and embed feedback texts, one vector per text, in order.
///
/// An empty input returns immediately without touching the model. The
/// embedder's output is checked for count and uniform dimension.
pub async fn generate_embeddings(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f64>>, ModelError> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let cleaned: Vec<String> = texts.iter().map(|t| normalize(t)).collect();
    let vectors = embedder.embed(&cleaned).await.map_err(ModelError::Encode)?;

    if vectors.len() != texts.len() {
        return Err(ModelError::CountMismatch {
            expected: texts.len(),
            found: vectors.len(),
        });
    }

    let expected = vectors.first().map(Vec::len).unwrap_or(0);
    if let Some((index, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected) {
        return Err(ModelError::DimensionMismatch {
            index,
            expected,
            found: v.len(),
        });
    }

    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Records what it was asked to embed and returns fixed-size vectors.
    struct RecordingEmbedder {
        seen: StdMutex<Vec<Vec<String>>>,
        dims: Vec<usize>,
    }

    impl RecordingEmbedder {
        fn uniform(dim: usize) -> Self {
            Self {
                seen: StdMutex::new(Vec::new()),
                dims: vec![dim],
            }
        }
    }

    #[async_trait]
    impl Embedder for RecordingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
            self.seen.lock().unwrap().push(texts.to_vec());
            Ok(texts
                .iter()
                .enumerate()
                .map(|(i, _)| vec![i as f64; self.dims[i % self.dims.len()]])
                .collect())
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f64>>> {
            anyhow::bail!("out of memory")
        }
    }

    struct ShortEmbedder;

    #[async_trait]
    impl Embedder for ShortEmbedder {
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f64>>> {
            Ok(vec![vec![1.0, 0.0]])
        }
    }

    #[test]
    fn test_mean_pool_ignores_padding() {
        // batch 1, seq 3, dim 2; third token is padding
        let hidden = vec![1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        let mask = vec![1, 1, 0];
        let pooled = mean_pool(&hidden, &mask, 1, 3, 2);
        assert_eq!(pooled.len(), 1);
        assert!((pooled[0][0] - 2.0).abs() < 1e-10);
        assert!((pooled[0][1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn test_mean_pool_batch_rows_are_independent() {
        // batch 2, seq 2, dim 1
        let hidden = vec![2.0, 4.0, 10.0, 0.0];
        let mask = vec![1, 1, 1, 0];
        let pooled = mean_pool(&hidden, &mask, 2, 2, 1);
        assert!((pooled[0][0] - 3.0).abs() < 1e-10);
        assert!((pooled[1][0] - 10.0).abs() < 1e-10);
    }

    #[test]
    fn test_mean_pool_all_masked_is_zero() {
        let hidden = vec![5.0, 5.0];
        let mask = vec![0, 0];
        let pooled = mean_pool(&hidden, &mask, 1, 2, 1);
        assert!(pooled[0][0].abs() < f64::EPSILON);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-10);
        assert!((v[1] - 0.8).abs() < 1e-10);
    }

    #[test]
    fn test_l2_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_generate_embeddings_normalizes_input() {
        let embedder = RecordingEmbedder::uniform(4);
        let texts = vec!["  Dark   MODE ".to_string(), "Export\nCSV".to_string()];
        let vectors = generate_embeddings(&embedder, &texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        let seen = embedder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "all texts go to the model in one call");
        assert_eq!(seen[0], vec!["dark mode".to_string(), "export csv".to_string()]);
    }

    #[tokio::test]
    async fn test_generate_embeddings_preserves_order() {
        let embedder = RecordingEmbedder::uniform(2);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();
        let vectors = generate_embeddings(&embedder, &texts).await.unwrap();
        for (i, v) in vectors.iter().enumerate() {
            assert!((v[0] - i as f64).abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn test_generate_embeddings_empty_skips_model() {
        let embedder = RecordingEmbedder::uniform(4);
        let vectors = generate_embeddings(&embedder, &[]).await.unwrap();
        assert!(vectors.is_empty());
        assert!(embedder.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_embeddings_propagates_model_failure() {
        let err = generate_embeddings(&BrokenEmbedder, &["hello".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Encode(_)));
        assert!(err.to_string().contains("out of memory"));
    }

    #[tokio::test]
    async fn test_generate_embeddings_rejects_count_mismatch() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = generate_embeddings(&ShortEmbedder, &texts).await.unwrap_err();
        assert!(matches!(
            err,
            ModelError::CountMismatch {
                expected: 2,
                found: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_generate_embeddings_rejects_ragged_dimensions() {
        let embedder = RecordingEmbedder {
            seen: StdMutex::new(Vec::new()),
            dims: vec![3, 2],
        };
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = generate_embeddings(&embedder, &texts).await.unwrap_err();
        assert!(matches!(err, ModelError::DimensionMismatch { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_shared_embedder_missing_model_is_not_cached() {
        let dir = std::env::temp_dir().join("chaff-test-no-model");
        let embedder = SharedEmbedder::new(&dir);

        let first = embedder.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(first.to_string().contains("Embedding model not found"));
        assert!(!SharedEmbedder::is_loaded());

        // A failed load is retried rather than remembered
        let second = embedder.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(second.to_string().contains("Embedding model not found"));
    }

    fn counting_loader(
        loads: Arc<AtomicUsize>,
    ) -> impl FnOnce(&Path) -> Result<usize> + Send + 'static {
        move |_dir| {
            std::thread::sleep(Duration::from_millis(20));
            Ok(loads.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[tokio::test]
    async fn test_concurrent_first_calls_load_once() {
        let cell = OnceCell::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let dir = Path::new("models");

        let (a, b, c) = tokio::join!(
            load_once(&cell, dir, counting_loader(loads.clone())),
            load_once(&cell, dir, counting_loader(loads.clone())),
            load_once(&cell, dir, counting_loader(loads.clone())),
        );

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!((*a.unwrap(), *b.unwrap(), *c.unwrap()), (1, 1, 1));

        let later = load_once(&cell, dir, counting_loader(loads.clone())).await;
        assert_eq!(*later.unwrap(), 1);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let cell: OnceCell<usize> = OnceCell::new();
        let dir = Path::new("models");

        let err = load_once(&cell, dir, |_dir: &Path| -> Result<usize> {
            anyhow::bail!("tokenizer.json missing")
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("tokenizer.json missing"));
        assert!(!cell.initialized());

        let loads = Arc::new(AtomicUsize::new(0));
        let value = load_once(&cell, dir, counting_loader(loads.clone())).await;
        assert_eq!(*value.unwrap(), 1);
        assert!(cell.initialized());
    }
}
