//! Checkpoint loader tolerant of the shapes training jobs save in

use crate::error::{Result, TriageError};
use crate::models::topology::ParameterSchema;
use candle_core::pickle::{Object, Stack, TensorInfo};
use candle_core::{DType, Device, Tensor};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

/// Entry holding the weights in `{"model_state_dict": ..., "epoch": ...}` checkpoints
pub const MODEL_STATE_KEY: &str = "model_state_dict";
/// Entry holding the weights in `{"state_dict": ...}` checkpoints
pub const STATE_KEY: &str = "state_dict";

/// Attribute containers of a serialized module tree
const MODULE_TREE_SEGMENTS: [&str; 3] = ["_modules", "_parameters", "_buffers"];

/// Wrapper prefixes stripped from parameter names by default
pub fn default_strip_prefixes() -> Vec<String> {
    vec!["backbone.".to_string(), "module.".to_string()]
}

/// On-disk encoding of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    /// safetensors file; nested mappings appear as dotted namespaces
    SafeTensors,
    /// `torch.save` zip archive
    TorchArchive,
}

impl ArtifactFormat {
    /// Detect the encoding from the leading bytes.
    pub fn sniff(path: &Path) -> std::io::Result<Self> {
        let mut header = [0u8; 9];
        let mut file = File::open(path)?;
        let read = file.read(&mut header)?;

        if read >= 4 && header[..4] == *b"PK\x03\x04" {
            Ok(ArtifactFormat::TorchArchive)
        } else if read == header.len() && header[8] == b'{' {
            Ok(ArtifactFormat::SafeTensors)
        } else {
            // Legacy pickles and anything else go through the torch reader,
            // which reports a precise error if it cannot parse them.
            Ok(ArtifactFormat::TorchArchive)
        }
    }
}

/// Raw tensors of a checkpoint, addressed by dotted path.
#[derive(Debug, Clone, Default)]
pub struct Artifact {
    entries: BTreeMap<String, Tensor>,
}

impl Artifact {
    pub fn from_entries<I: IntoIterator<Item = (String, Tensor)>>(entries: I) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Read every tensor of the artifact at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let read_error = |source: candle_core::Error| TriageError::ArtifactRead {
            path: path.to_path_buf(),
            source,
        };

        let format = ArtifactFormat::sniff(path).map_err(|e| read_error(e.into()))?;
        debug!(path = %path.display(), format = ?format, "Reading checkpoint");

        match format {
            ArtifactFormat::SafeTensors => {
                let tensors = candle_core::safetensors::load(path, &Device::Cpu).map_err(read_error)?;
                Ok(Self::from_entries(tensors))
            }
            ArtifactFormat::TorchArchive => Self::read_torch(path).map_err(read_error),
        }
    }

    /// Walk the pickled object of a torch archive. Nested mappings become
    /// dotted namespaces and a pickled module keeps its attribute path
    /// (`_modules.classifier._parameters.bias`), so every checkpoint shape
    /// reaches the extraction strategies intact.
    fn read_torch(path: &Path) -> candle_core::Result<Self> {
        let mut archive = ZipArchive::new(BufReader::new(File::open(path)?))?;
        let pickle_name = archive
            .file_names()
            .find(|name| name.ends_with("data.pkl"))
            .map(str::to_string)
            .ok_or_else(|| candle_core::Error::Msg("torch archive has no data.pkl record".to_string()))?;

        let root = {
            let mut reader = BufReader::new(archive.by_name(&pickle_name)?);
            let mut stack = Stack::empty();
            stack.read_loop(&mut reader)?;
            stack.finalize()?
        };

        let record_dir = PathBuf::from(pickle_name.trim_end_matches(".pkl"));
        let mut infos = Vec::new();
        collect_tensor_infos(root, "", &record_dir, &mut infos);

        let entries = infos
            .into_iter()
            .map(|info| {
                let tensor = read_record(&mut archive, &info)?;
                Ok((info.name, tensor))
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self::from_entries(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn namespace(&self, key: &str) -> Option<BTreeMap<String, Tensor>> {
        let prefix = format!("{key}.");
        let nested: BTreeMap<String, Tensor> = self
            .entries
            .iter()
            .filter_map(|(name, tensor)| {
                name.strip_prefix(&prefix)
                    .map(|inner| (inner.to_string(), tensor.clone()))
            })
            .collect();
        (!nested.is_empty()).then_some(nested)
    }

    fn has_module_tree(&self) -> bool {
        self.entries.keys().any(|name| is_module_tree_path(name))
    }
}

fn collect_tensor_infos(object: Object, prefix: &str, record_dir: &Path, out: &mut Vec<TensorInfo>) {
    match object {
        Object::Dict(entries) => {
            for (key, value) in entries {
                let Ok(key) = key.unicode() else { continue };
                let name = format!("{prefix}{key}");
                match value {
                    value @ Object::Reduce { .. } => {
                        match value.into_tensor_info(Object::Unicode(name.clone()), record_dir) {
                            Ok(Some(info)) => out.push(info),
                            Ok(None) => {}
                            Err(e) => debug!(name = %name, error = %e, "Skipping unreadable tensor record"),
                        }
                    }
                    nested => collect_tensor_infos(nested, &format!("{name}."), record_dir, out),
                }
            }
        }
        // A pickled module: the attribute dict carries its module tree
        Object::Build { args, .. } => collect_tensor_infos(*args, prefix, record_dir, out),
        _ => {}
    }
}

/// Tensor data of one storage record, honoring the view's element offset
fn read_record<R: Read + Seek>(archive: &mut ZipArchive<R>, info: &TensorInfo) -> candle_core::Result<Tensor> {
    let layout = &info.layout;
    let row_major = layout.is_contiguous();
    let column_major = layout.is_fortran_contiguous();
    if !row_major && !column_major {
        return Err(candle_core::Error::Msg(format!(
            "tensor {} has a non-contiguous layout {layout:?}",
            info.name
        )));
    }

    let mut bytes = Vec::new();
    archive.by_name(&info.path)?.read_to_end(&mut bytes)?;

    let element = info.dtype.size_in_bytes();
    let start = layout.start_offset() * element;
    let end = start + layout.shape().elem_count() * element;
    let data = bytes.get(start..end).ok_or_else(|| {
        candle_core::Error::Msg(format!(
            "tensor {} needs bytes {start}..{end} of {} but the record holds {}",
            info.name,
            info.path,
            bytes.len()
        ))
    })?;

    let dims = layout.dims();
    if row_major || dims.len() < 2 {
        return Tensor::from_raw_buffer(data, info.dtype, dims, &Device::Cpu);
    }
    // Column-major storage: read transposed, then restore the axis order
    let reversed: Vec<usize> = dims.iter().rev().copied().collect();
    Tensor::from_raw_buffer(data, info.dtype, &reversed, &Device::Cpu)?
        .permute((0..dims.len()).rev().collect::<Vec<_>>())?
        .contiguous()
}

fn is_module_tree_path(name: &str) -> bool {
    name.split('.')
        .any(|segment| MODULE_TREE_SEGMENTS.contains(&segment))
}

/// `_modules.features._modules.0._parameters.weight` -> `features.0.weight`
fn collapse_module_tree(name: &str) -> String {
    name.split('.')
        .filter(|segment| !MODULE_TREE_SEGMENTS.contains(segment))
        .collect::<Vec<_>>()
        .join(".")
}

/// Ways a checkpoint may hold its parameter mapping, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// Mapping nested under `model_state_dict`
    NestedModelState,
    /// Mapping nested under `state_dict`
    NestedState,
    /// The artifact is the mapping
    FlatMapping,
    /// A serialized module; parameters live in its module tree
    FullObject,
}

impl ExtractionStrategy {
    pub const PRIORITY: [ExtractionStrategy; 4] = [
        ExtractionStrategy::NestedModelState,
        ExtractionStrategy::NestedState,
        ExtractionStrategy::FlatMapping,
        ExtractionStrategy::FullObject,
    ];

    /// Parameter mapping if the artifact has this shape
    pub fn extract(self, artifact: &Artifact) -> Option<BTreeMap<String, Tensor>> {
        match self {
            ExtractionStrategy::NestedModelState => artifact.namespace(MODEL_STATE_KEY),
            ExtractionStrategy::NestedState => artifact.namespace(STATE_KEY),
            ExtractionStrategy::FlatMapping => {
                (!artifact.is_empty() && !artifact.has_module_tree()).then(|| artifact.entries.clone())
            }
            ExtractionStrategy::FullObject => artifact.has_module_tree().then(|| {
                artifact
                    .entries
                    .iter()
                    .map(|(name, tensor)| (collapse_module_tree(name), tensor.clone()))
                    .collect()
            }),
        }
    }

    /// First strategy that recognizes the artifact. Unrecognized artifacts
    /// are treated as a flat mapping in full.
    pub fn resolve(artifact: &Artifact) -> (ExtractionStrategy, BTreeMap<String, Tensor>) {
        Self::PRIORITY
            .iter()
            .find_map(|&strategy| strategy.extract(artifact).map(|mapping| (strategy, mapping)))
            .unwrap_or_else(|| (ExtractionStrategy::FlatMapping, artifact.entries.clone()))
    }
}

/// Parameters matched against a topology schema
#[derive(Debug, Clone)]
pub struct CheckpointParameters {
    /// Matched tensors, converted to f32 on the target device
    pub tensors: HashMap<String, Tensor>,
    /// Strategy that recognized the artifact
    pub strategy: ExtractionStrategy,
    /// Names present in the checkpoint but not in the schema
    pub dropped: Vec<String>,
    /// Schema names the checkpoint did not provide
    pub missing: Vec<String>,
}

impl CheckpointParameters {
    pub fn matched(&self) -> usize {
        self.tensors.len()
    }
}

/// Resolves checkpoints of unknown shape into schema-compatible parameters
#[derive(Debug, Clone)]
pub struct CheckpointLoader {
    /// Wrapper prefixes removed from parameter names
    strip_prefixes: Vec<String>,
    device: Device,
}

impl CheckpointLoader {
    pub fn new(strip_prefixes: Vec<String>, device: Device) -> Self {
        Self {
            strip_prefixes,
            device,
        }
    }

    /// Load the checkpoint at `path` and match it against `schema`.
    pub fn load<P: AsRef<Path>>(&self, path: P, schema: &ParameterSchema) -> Result<CheckpointParameters> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TriageError::ArtifactNotFound(path.to_path_buf()));
        }

        info!(path = %path.display(), "Loading checkpoint");
        let artifact = Artifact::read(path)?;
        let parameters = self.resolve(&artifact, schema)?;

        info!(
            path = %path.display(),
            strategy = ?parameters.strategy,
            matched = parameters.matched(),
            dropped = parameters.dropped.len(),
            missing = parameters.missing.len(),
            "Checkpoint matched against topology"
        );

        Ok(parameters)
    }

    /// Match an already-read artifact against `schema`.
    ///
    /// Unknown names are dropped and missing names left to the caller's
    /// defaults; only a checkpoint that matches nothing, or a matched tensor
    /// with the wrong shape, is rejected.
    pub fn resolve(&self, artifact: &Artifact, schema: &ParameterSchema) -> Result<CheckpointParameters> {
        let (strategy, mapping) = ExtractionStrategy::resolve(artifact);

        let mut tensors = HashMap::new();
        let mut dropped = Vec::new();

        for (raw_name, tensor) in mapping {
            let name = self.normalize_key(&raw_name);
            let Some(expected) = schema.shape(name) else {
                dropped.push(raw_name);
                continue;
            };

            if tensor.dims() != expected {
                return Err(TriageError::LoadIntegrity(format!(
                    "parameter {name} has shape {:?}, topology expects {:?}",
                    tensor.dims(),
                    expected
                )));
            }

            if tensors.contains_key(name) {
                warn!(parameter = %name, source = %raw_name, "Duplicate parameter after prefix stripping, keeping first");
                continue;
            }

            let tensor = tensor.to_dtype(DType::F32)?.to_device(&self.device)?;
            tensors.insert(name.to_string(), tensor);
        }

        if tensors.is_empty() {
            return Err(TriageError::LoadIntegrity(format!(
                "none of {} checkpoint parameters match the {} topology parameters",
                dropped.len(),
                schema.len()
            )));
        }

        if !dropped.is_empty() {
            debug!(count = dropped.len(), names = ?dropped, "Dropped parameters unknown to the topology");
        }

        let missing: Vec<String> = schema
            .iter()
            .map(|(name, _)| name)
            .filter(|name| !tensors.contains_key(*name))
            .map(str::to_string)
            .collect();

        Ok(CheckpointParameters {
            tensors,
            strategy,
            dropped,
            missing,
        })
    }

    /// Strip known wrapper prefixes, repeatedly, so stacked wrappers normalize too.
    pub fn normalize_key<'a>(&self, name: &'a str) -> &'a str {
        let mut name = name;
        while let Some(stripped) = self
            .strip_prefixes
            .iter()
            .find_map(|prefix| name.strip_prefix(prefix.as_str()))
        {
            name = stripped;
        }
        name
    }
}

impl Default for CheckpointLoader {
    fn default() -> Self {
        Self::new(default_strip_prefixes(), Device::Cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_safetensors;
    use std::io::Write;

    fn schema() -> ParameterSchema {
        [
            ("features.0.0.weight".to_string(), vec![2, 3]),
            ("classifier.1.weight".to_string(), vec![3, 2]),
            ("classifier.1.bias".to_string(), vec![3]),
        ]
        .into_iter()
        .collect()
    }

    fn tensor(shape: &[usize], value: f32) -> Tensor {
        Tensor::full(value, shape, &Device::Cpu).unwrap()
    }

    fn entries(prefix: &str) -> Vec<(String, Tensor)> {
        vec![
            (format!("{prefix}features.0.0.weight"), tensor(&[2, 3], 0.5)),
            (format!("{prefix}classifier.1.weight"), tensor(&[3, 2], 1.5)),
            (format!("{prefix}classifier.1.bias"), tensor(&[3], -1.0)),
        ]
    }

    fn bias(parameters: &CheckpointParameters) -> Vec<f32> {
        parameters.tensors["classifier.1.bias"].to_vec1::<f32>().unwrap()
    }

    #[test]
    fn test_strategy_priority() {
        let mut all = entries("model_state_dict.");
        all.extend(entries("state_dict.").into_iter().map(|(n, _)| (n, tensor(&[1], 9.0))));
        all.push(("epoch".to_string(), tensor(&[1], 12.0)));

        let artifact = Artifact::from_entries(all);
        let (strategy, mapping) = ExtractionStrategy::resolve(&artifact);
        assert_eq!(strategy, ExtractionStrategy::NestedModelState);
        assert_eq!(mapping.len(), 3);
    }

    #[test]
    fn test_each_shape_resolves_to_same_parameters() {
        let loader = CheckpointLoader::default();
        let schema = schema();

        let shapes = [
            ("model_state_dict.", ExtractionStrategy::NestedModelState),
            ("state_dict.", ExtractionStrategy::NestedState),
            ("backbone.", ExtractionStrategy::FlatMapping),
            ("", ExtractionStrategy::FlatMapping),
        ];

        for (prefix, expected) in shapes {
            let parameters = loader
                .resolve(&Artifact::from_entries(entries(prefix)), &schema)
                .unwrap();
            assert_eq!(parameters.strategy, expected, "prefix {prefix:?}");
            assert_eq!(parameters.matched(), 3);
            assert_eq!(bias(&parameters), vec![-1.0; 3]);
        }
    }

    #[test]
    fn test_full_object_module_tree() {
        let artifact = Artifact::from_entries(vec![
            (
                "_modules.features._modules.0._modules.0._parameters.weight".to_string(),
                tensor(&[2, 3], 0.5),
            ),
            (
                "_modules.classifier._modules.1._parameters.bias".to_string(),
                tensor(&[3], 2.0),
            ),
            (
                "_modules.features._modules.0._modules.1._buffers.num_batches_tracked".to_string(),
                tensor(&[1], 0.0),
            ),
        ]);

        let parameters = CheckpointLoader::default().resolve(&artifact, &schema()).unwrap();
        assert_eq!(parameters.strategy, ExtractionStrategy::FullObject);
        assert_eq!(parameters.matched(), 2);
        assert_eq!(bias(&parameters), vec![2.0; 3]);
        assert_eq!(parameters.missing, vec!["classifier.1.weight".to_string()]);
        assert_eq!(parameters.dropped.len(), 1);
    }

    #[test]
    fn test_stacked_prefixes() {
        let loader = CheckpointLoader::default();
        assert_eq!(loader.normalize_key("module.backbone.features.0.0.weight"), "features.0.0.weight");
        assert_eq!(loader.normalize_key("classifier.1.bias"), "classifier.1.bias");
        // Only leading prefixes are stripped
        assert_eq!(loader.normalize_key("features.backbone.x"), "features.backbone.x");
    }

    #[test]
    fn test_partial_checkpoint_loads() {
        let mut partial = entries("");
        partial.retain(|(name, _)| name != "features.0.0.weight");
        partial.push(("features.0.1.num_batches_tracked".to_string(), tensor(&[1], 3.0)));

        let parameters = CheckpointLoader::default()
            .resolve(&Artifact::from_entries(partial), &schema())
            .unwrap();

        assert_eq!(parameters.matched(), 2);
        assert_eq!(parameters.missing, vec!["features.0.0.weight".to_string()]);
        assert_eq!(parameters.dropped, vec!["features.0.1.num_batches_tracked".to_string()]);
    }

    #[test]
    fn test_no_matching_names_is_integrity_error() {
        let artifact = Artifact::from_entries(vec![
            ("encoder.layer.0.weight".to_string(), tensor(&[4], 1.0)),
        ]);
        let err = CheckpointLoader::default().resolve(&artifact, &schema()).unwrap_err();
        assert!(matches!(err, TriageError::LoadIntegrity(_)));

        let err = CheckpointLoader::default()
            .resolve(&Artifact::default(), &schema())
            .unwrap_err();
        assert!(matches!(err, TriageError::LoadIntegrity(_)));
    }

    #[test]
    fn test_shape_mismatch_is_integrity_error() {
        let artifact = Artifact::from_entries(vec![
            ("classifier.1.weight".to_string(), tensor(&[5, 2], 1.0)),
        ]);
        let err = CheckpointLoader::default().resolve(&artifact, &schema()).unwrap_err();
        assert!(err.to_string().contains("classifier.1.weight"));
    }

    #[test]
    fn test_missing_file() {
        let err = CheckpointLoader::default()
            .load("does/not/exist.pth", &schema())
            .unwrap_err();
        assert!(matches!(err, TriageError::ArtifactNotFound(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_safetensors_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_safetensors(dir.path(), "ckpt.safetensors", entries("state_dict."));

        assert_eq!(ArtifactFormat::sniff(&path).unwrap(), ArtifactFormat::SafeTensors);
        let parameters = CheckpointLoader::default().load(&path, &schema()).unwrap();
        assert_eq!(parameters.strategy, ExtractionStrategy::NestedState);
        assert_eq!(parameters.matched(), 3);
    }

    /// Protocol 2 pickle writer covering what `torch.save` emits
    struct Pickle(Vec<u8>);

    impl Pickle {
        fn new() -> Self {
            Self(vec![0x80, 2])
        }

        fn op(&mut self, op: u8) -> &mut Self {
            self.0.push(op);
            self
        }

        fn global(&mut self, module: &str, name: &str) -> &mut Self {
            self.0.push(b'c');
            self.0.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
            self
        }

        fn text(&mut self, value: &str) -> &mut Self {
            self.0.push(b'X');
            self.0.extend_from_slice(&(value.len() as u32).to_le_bytes());
            self.0.extend_from_slice(value.as_bytes());
            self
        }

        fn int(&mut self, value: u8) -> &mut Self {
            self.0.extend_from_slice(&[b'K', value]);
            self
        }

        fn ints(&mut self, values: &[u8]) -> &mut Self {
            self.op(b'(');
            for &value in values {
                self.int(value);
            }
            self.op(b't')
        }

        fn ordered_dict(&mut self) -> &mut Self {
            self.global("collections", "OrderedDict").op(b')').op(b'R')
        }

        /// `_rebuild_tensor_v2` over float storage record `0`
        fn tensor(&mut self, offset: u8, size: &[u8], stride: &[u8]) -> &mut Self {
            self.global("torch._utils", "_rebuild_tensor_v2").op(b'(');
            self.op(b'(')
                .text("storage")
                .global("torch", "FloatStorage")
                .text("0")
                .text("cpu")
                .int(9)
                .op(b't')
                .op(b'Q');
            self.int(offset).ints(size).ints(stride).op(0x89);
            self.ordered_dict().op(b't').op(b'R')
        }

        fn parameter(&mut self, offset: u8, size: &[u8], stride: &[u8]) -> &mut Self {
            self.global("torch._utils", "_rebuild_parameter").op(b'(');
            self.tensor(offset, size, stride).op(0x88);
            self.ordered_dict().op(b't').op(b'R')
        }

        /// Opens a module; the caller writes `_modules` and `_parameters`
        fn module(&mut self, class: &str) -> &mut Self {
            self.global("torch.nn.modules", class)
                .op(b')')
                .op(0x81)
                .op(b'}')
                .op(b'(')
                .text("training")
                .op(0x88)
        }

        fn end_module(&mut self) -> &mut Self {
            self.op(b'u').op(b'b')
        }

        fn finish(&mut self) -> Vec<u8> {
            self.op(b'.');
            std::mem::take(&mut self.0)
        }
    }

    /// Zip archive laid out like `torch.save` output, one float storage record
    fn write_torch_archive(dir: &Path, name: &str, pickle: &[u8], storage: &[f32]) -> PathBuf {
        let path = dir.join(name);
        let mut archive = zip::ZipWriter::new(File::create(&path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        archive.start_file("archive/data.pkl", options).unwrap();
        archive.write_all(pickle).unwrap();
        archive.start_file("archive/data/0", options).unwrap();
        let bytes: Vec<u8> = storage.iter().flat_map(|v| v.to_le_bytes()).collect();
        archive.write_all(&bytes).unwrap();
        archive.start_file("archive/version", options).unwrap();
        archive.write_all(b"3\n").unwrap();
        archive.finish().unwrap();
        path
    }

    fn storage() -> Vec<f32> {
        (0..9).map(|i| i as f32).collect()
    }

    #[test]
    fn test_torch_archive_of_whole_module() {
        let mut pickle = Pickle::new();
        // EfficientNet { classifier: Sequential { 1: Linear { weight, bias } } }
        pickle.module("EfficientNet").text("_parameters").ordered_dict();
        pickle.text("_modules").ordered_dict().op(b'(').text("classifier");
        pickle.module("Sequential").text("_parameters").ordered_dict();
        pickle.text("_modules").ordered_dict().op(b'(').text("1");
        pickle.module("Linear").text("_parameters").ordered_dict().op(b'(');
        pickle.text("weight").parameter(0, &[3, 2], &[2, 1]);
        pickle.text("bias").parameter(6, &[3], &[1]);
        pickle.op(b'u').end_module();
        pickle.op(b'u').end_module();
        pickle.op(b'u').end_module();

        let dir = tempfile::tempdir().unwrap();
        let path = write_torch_archive(dir.path(), "model.pth", &pickle.finish(), &storage());

        assert_eq!(ArtifactFormat::sniff(&path).unwrap(), ArtifactFormat::TorchArchive);
        let parameters = CheckpointLoader::default().load(&path, &schema()).unwrap();
        assert_eq!(parameters.strategy, ExtractionStrategy::FullObject);
        assert_eq!(parameters.matched(), 2);
        assert_eq!(bias(&parameters), vec![6.0, 7.0, 8.0]);
        assert_eq!(
            parameters.tensors["classifier.1.weight"].to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]]
        );
        assert_eq!(parameters.missing, vec!["features.0.0.weight".to_string()]);
    }

    #[test]
    fn test_torch_archive_of_training_checkpoint() {
        // {"epoch": 4, "model_state_dict": OrderedDict(...)}
        let mut pickle = Pickle::new();
        pickle.op(b'}').op(b'(').text("epoch").int(4);
        pickle.text("model_state_dict").ordered_dict().op(b'(');
        pickle.text("classifier.1.weight").tensor(0, &[3, 2], &[1, 3]);
        pickle.text("classifier.1.bias").tensor(6, &[3], &[1]);
        pickle.op(b'u').op(b'u');

        let dir = tempfile::tempdir().unwrap();
        let path = write_torch_archive(dir.path(), "ckpt.pth", &pickle.finish(), &storage());

        let parameters = CheckpointLoader::default().load(&path, &schema()).unwrap();
        assert_eq!(parameters.strategy, ExtractionStrategy::NestedModelState);
        assert_eq!(bias(&parameters), vec![6.0, 7.0, 8.0]);
        // Column-major weight, as saved from a transposed view
        assert_eq!(
            parameters.tensors["classifier.1.weight"].to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 3.0], vec![1.0, 4.0], vec![2.0, 5.0]]
        );
    }

    #[test]
    fn test_corrupt_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pth");
        std::fs::write(&path, b"PK\x03\x04 truncated archive").unwrap();

        let err = CheckpointLoader::default().load(&path, &schema()).unwrap_err();
        assert!(matches!(err, TriageError::ArtifactRead { .. }));
    }
}
