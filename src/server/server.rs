use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use crate::pipeline::pipeline::{PredictionResult, SignPipeline};
use crate::utils::image::{decode_data_uri, decode_frame_bytes};

pub mod signstream {
    tonic::include_proto!("signstream");
}

use signstream::sign_inference_server::{SignInference, SignInferenceServer};
use signstream::{FramePayload, HealthReply, HealthRequest, Prediction};

/// handle_frame turns one frame payload into its reply text. Decode
/// failures are folded into the `Error` sentinel here; everything past
/// decoding is already guarded by the pipeline's own boundary.
pub async fn handle_frame(pipeline: &SignPipeline, payload: &str) -> String {
    let frame = match decode_data_uri(payload).and_then(|im_bytes| decode_frame_bytes(&im_bytes)) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("server - could not decode frame: {:#}", e);
            return PredictionResult::Error.to_string();
        }
    };

    pipeline.predict_frame(&frame).await.to_string()
}

/// gRPC service wrapping the shared inference pipeline. The pipeline is
/// built once at startup and read concurrently by every connection.
pub struct SignInferenceService {
    pipeline: Arc<SignPipeline>,
}

impl SignInferenceService {
    pub fn new(pipeline: Arc<SignPipeline>) -> Self {
        SignInferenceService { pipeline }
    }
}

#[tonic::async_trait]
impl SignInference for SignInferenceService {
    type StreamPredictStream = ReceiverStream<Result<Prediction, Status>>;

    async fn stream_predict(
        &self,
        request: Request<Streaming<FramePayload>>,
    ) -> Result<Response<Self::StreamPredictStream>, Status> {
        let mut frames = request.into_inner();
        let pipeline = self.pipeline.clone();
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            info!("server - stream opened");
            loop {
                let frame = match frames.message().await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("server - receive failed: {}", e);
                        break;
                    }
                };

                let result = handle_frame(&pipeline, &frame.data).await;
                if tx.send(Ok(Prediction { result })).await.is_err() {
                    // client stopped reading
                    break;
                }
            }
            info!("server - stream closed");
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn health(
        &self,
        _request: Request<HealthRequest>,
    ) -> Result<Response<HealthReply>, Status> {
        Ok(Response::new(HealthReply {
            message: "Sign inference backend is running".to_string(),
        }))
    }
}

/// serve runs the streaming inference server until the process stops.
///
/// # Arguments
/// * `addr` - socket address to listen on
/// * `pipeline` - the shared inference pipeline
///
/// # Returns
/// * `Result<(), Error>`
pub async fn serve(addr: SocketAddr, pipeline: Arc<SignPipeline>) -> Result<(), Error> {
    info!("server - listening on {}", addr);
    Server::builder()
        .add_service(SignInferenceServer::new(SignInferenceService::new(pipeline)))
        .serve_with_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            info!("server - shutdown signal received");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::config::DecisionConfig;
    use crate::modules::hand_detector::LandmarkSource;
    use crate::modules::sign_classifier::Scorer;
    use crate::utils::coordinate::{
        Coordinate2D, HandLandmarks, NormalizedLandmarks, HAND_LANDMARK_COUNT,
    };
    use base64::prelude::{Engine as _, BASE64_STANDARD};
    use opencv::core::{Mat, Scalar, Vector};
    use opencv::imgcodecs::imencode;

    struct OneHand;

    #[tonic::async_trait]
    impl LandmarkSource for OneHand {
        async fn detect(&self, _frame: &Mat) -> Result<Vec<HandLandmarks>, Error> {
            let mut points = [Coordinate2D { x: 0.0, y: 0.0 }; HAND_LANDMARK_COUNT];
            for (i, point) in points.iter_mut().enumerate() {
                point.x = 0.1 + 0.02 * i as f32;
                point.y = 0.9 - 0.03 * i as f32;
            }
            Ok(vec![HandLandmarks { points }])
        }
    }

    struct ConfidentScorer;

    impl Scorer for ConfidentScorer {
        fn score(&self, _features: &NormalizedLandmarks) -> Result<(String, f32), Error> {
            Ok(("hello".to_string(), 0.95))
        }
    }

    fn frame_payload() -> String {
        let img = Mat::new_rows_cols_with_default(8, 8, opencv::core::CV_8UC3, Scalar::all(96.0))
            .unwrap();
        let mut buf = Vector::<u8>::new();
        imencode(".png", &img, &mut buf, &Vector::new()).unwrap();
        format!("data:image/png;base64,{}", BASE64_STANDARD.encode(buf.to_vec()))
    }

    fn test_pipeline() -> SignPipeline {
        SignPipeline::new(
            Box::new(OneHand),
            Some(Box::new(ConfidentScorer)),
            DecisionConfig::new(),
        )
    }

    #[tokio::test]
    async fn test_handle_frame_returns_label() {
        let pipeline = test_pipeline();
        assert_eq!(handle_frame(&pipeline, &frame_payload()).await, "hello");
    }

    #[tokio::test]
    async fn test_one_malformed_frame_among_many() {
        let pipeline = test_pipeline();
        let valid = frame_payload();

        let mut results: Vec<String> = Vec::with_capacity(100);
        for i in 0..100 {
            let payload = if i == 50 { "garbage without a comma" } else { valid.as_str() };
            results.push(handle_frame(&pipeline, payload).await);
        }

        assert_eq!(results.len(), 100);
        assert_eq!(results[50], "Error");
        assert!(results
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 50)
            .all(|(_, r)| r == "hello"));
    }

    #[tokio::test]
    async fn test_health_reply() {
        let service = SignInferenceService::new(Arc::new(test_pipeline()));
        let reply = service
            .health(Request::new(HealthRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(reply.message, "Sign inference backend is running");
    }
}
