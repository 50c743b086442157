use anyhow::Error;
use tonic::transport::Channel;

pub mod handpose {
    tonic::include_proto!("handpose");
}

use handpose::hand_landmark_service_client::HandLandmarkServiceClient;
use handpose::{DetectLandmarksRequest, DetectLandmarksResponse};

/// Thin wrapper around the generated client for the external hand-landmark
/// detection service.
#[derive(Debug, Clone)]
pub struct LandmarkDetectionClient {
    inner: HandLandmarkServiceClient<Channel>,
}

impl LandmarkDetectionClient {
    /// connect establishes the channel to the detection service.
    ///
    /// # Arguments
    /// * `addr` - service endpoint, e.g. "http://127.0.0.1:50051"
    ///
    /// # Returns
    /// * `Result<LandmarkDetectionClient, Error>`
    pub async fn connect(addr: String) -> Result<Self, Error> {
        let inner = match HandLandmarkServiceClient::connect(addr).await {
            Ok(inner) => inner,
            Err(e) => return Err(Error::from(e)),
        };
        Ok(LandmarkDetectionClient { inner })
    }

    /// connect_lazy builds the client without waiting for the service to be
    /// reachable; the channel connects on first use.
    pub fn connect_lazy(addr: String) -> Result<Self, Error> {
        let endpoint = tonic::transport::Endpoint::from_shared(addr)?;
        Ok(LandmarkDetectionClient {
            inner: HandLandmarkServiceClient::new(endpoint.connect_lazy()),
        })
    }

    pub async fn detect_landmarks(
        &self,
        request: tonic::Request<DetectLandmarksRequest>,
    ) -> Result<DetectLandmarksResponse, Error> {
        let mut client = self.inner.clone();
        let response = client.detect_landmarks(request).await?;
        Ok(response.into_inner())
    }
}
