use anyhow::Error;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use opencv::core::{Mat, MatTraitConst};
use opencv::imgcodecs::{imdecode, IMREAD_COLOR};
use opencv::imgproc::{cvt_color, COLOR_BGR2RGB};

/// decode_data_uri extracts the base64 payload from a data-URI style
/// frame message (`<prefix>,<base64 image bytes>`) and decodes it.
///
/// # Arguments
/// * `payload` - &str
///
/// # Returns
/// * `Result<Vec<u8>, Error>`
pub fn decode_data_uri(payload: &str) -> Result<Vec<u8>, Error> {
    let (_, encoded) = payload
        .split_once(',')
        .ok_or_else(|| Error::msg("image - frame payload is missing the data-uri prefix"))?;

    let im_bytes = BASE64_STANDARD.decode(encoded.trim())?;
    Ok(im_bytes)
}

/// decode_frame_bytes decodes one encoded image into an RGB matrix.
///
/// # Arguments
/// * `im_bytes` - &[u8]
///
/// # Returns
/// * `Result<Mat, Error>`
pub fn decode_frame_bytes(im_bytes: &[u8]) -> Result<Mat, Error> {
    let img_as_mat = match Mat::from_slice(im_bytes) {
        Ok(img_as_mat) => img_as_mat,
        Err(e) => return Err(Error::from(e)),
    };

    let img_as_arr_bgr = match imdecode(&img_as_mat, IMREAD_COLOR) {
        Ok(img_as_arr_bgr) => img_as_arr_bgr,
        Err(e) => return Err(Error::from(e)),
    };

    // imdecode reports an undecodable buffer as an empty matrix, not an error
    if img_as_arr_bgr.empty() {
        return Err(Error::msg("image - frame bytes could not be decoded"));
    }

    let mut img_as_arr_rgb = Mat::default();
    match cvt_color(&img_as_arr_bgr, &mut img_as_arr_rgb, COLOR_BGR2RGB, 0) {
        Ok(_) => {}
        Err(e) => return Err(Error::from(e)),
    };

    Ok(img_as_arr_rgb)
}
