use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tch::{CModule, Device, Kind, TchError, Tensor};

use crate::inference::model::{Classifier, ModelLoadError, PredictionError, Score};
use crate::inference::preprocess::ImageTensor;

/// TorchScript module. `CModule` is not `Sync`, so calls are serialized on the module lock.
pub struct TorchClassifier {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchClassifier {
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let device = Device::cuda_if_available();
        let module = CModule::load_on_device(path, device)
            .map_err(|e| ModelLoadError::Runtime(e.to_string()))?;
        log::info!("TorchScript module loaded on {:?}", device);
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }

    fn forward(&self, input: &ImageTensor) -> Result<Score, TchError> {
        let data: Vec<f32> = input.iter().copied().collect();
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let tensor = Tensor::f_from_slice(&data)?
            .f_view(shape.as_slice())?
            .to_device(self.device);

        let output = {
            let module = self.module.lock().unwrap_or_else(PoisonError::into_inner);
            tch::no_grad(|| module.forward_ts(&[tensor]))?
        };
        let flat = output
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .flatten(0, -1);
        Vec::<f32>::try_from(&flat)
    }
}

impl Classifier for TorchClassifier {
    fn predict(&self, input: &ImageTensor) -> Result<Score, PredictionError> {
        self.forward(input)
            .map_err(|e| PredictionError::Runtime(e.to_string()))
    }

    fn backend(&self) -> &'static str {
        "torch"
    }
}
