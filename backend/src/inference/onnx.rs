use std::path::Path;
use tract_onnx::prelude::*;

use crate::inference::model::{Classifier, ModelLoadError, PredictionError, Score};
use crate::inference::preprocess::{INPUT_SHAPE, ImageTensor};

/// ONNX graph evaluated by tract. The optimized plan is `Sync`, so calls run concurrently.
pub struct OnnxClassifier {
    plan: TypedRunnableModel<TypedModel>,
}

impl OnnxClassifier {
    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        let plan = build_plan(path).map_err(|e| ModelLoadError::Runtime(format!("{:?}", e)))?;
        Ok(Self { plan })
    }
}

fn build_plan(path: &Path) -> TractResult<TypedRunnableModel<TypedModel>> {
    tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(0, f32::fact(INPUT_SHAPE).into())?
        .into_optimized()?
        .into_runnable()
}

fn runtime_error(e: TractError) -> PredictionError {
    PredictionError::Runtime(format!("{:?}", e))
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: &ImageTensor) -> Result<Score, PredictionError> {
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(input.shape(), &data).map_err(runtime_error)?;

        let outputs = self.plan.run(tvec!(tensor.into())).map_err(runtime_error)?;
        let output = outputs
            .first()
            .ok_or_else(|| PredictionError::Runtime("model produced no outputs".to_string()))?;
        let scores = output.to_array_view::<f32>().map_err(runtime_error)?;

        Ok(scores.iter().copied().collect())
    }

    fn backend(&self) -> &'static str {
        "onnx"
    }
}
