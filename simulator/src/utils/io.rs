use anyhow::{Context, Result};
use ndarray::{Array, Array2, Array3, Dimension};
use ndarray_npy::{read_npy, write_npy, ReadNpyError, WritableElement};
use rustfft::num_complex::Complex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{spawn, JoinHandle};
use std::time::Instant;

use super::{error::RuntimeError, lit, Real};
use mslice_common::PotentialSource;

/// Reads a 3-D potential volume (slice, x, y) from a `.npy` file.
/// Files stored as either `f32` or `f64` are accepted and converted to `T`.
pub fn read_volume<T: Real>(path: &Path) -> Result<Array3<T>, RuntimeError> {
    if !path.is_file() {
        return Err(RuntimeError::MissingPotential {
            path: path.display().to_string(),
        });
    }
    let read_error = |e: ReadNpyError| RuntimeError::PotentialRead {
        path: path.display().to_string(),
        msg: e.to_string(),
    };

    match read_npy::<_, Array3<f32>>(path) {
        Ok(volume) => Ok(volume.mapv(|x| lit::<T>(x as f64))),
        Err(ReadNpyError::WrongDescriptor(_)) => {
            log::debug!("{} is not f32, retrying as f64", path.display());
            let volume: Array3<f64> = read_npy(path).map_err(read_error)?;
            Ok(volume.mapv(lit::<T>))
        }
        Err(e) => Err(read_error(e)),
    }
}

/// Makes the potential volume available locally, fetching it first for remote sources,
/// and returns the local path.
pub fn resolve_source(source: &PotentialSource) -> Result<PathBuf, RuntimeError> {
    let path = source.local_path();
    match source {
        PotentialSource::Local { .. } => Ok(path),
        #[cfg(feature = "remote-data")]
        PotentialSource::Remote { overwrite, .. } => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|_| RuntimeError::IOError {
                    path: parent.display().to_string(),
                })?;
            }
            let url = source.remote_url().unwrap_or_default();
            download_remote_file(&url, &path, *overwrite);
            Ok(path)
        }
        #[cfg(not(feature = "remote-data"))]
        PotentialSource::Remote { .. } => Err(RuntimeError::RemoteDisabled),
    }
}

/// Downloads `url` to `path` unless the file already exists (or `overwrite` is set).
/// Only a 200 response is written. Failures are logged and otherwise ignored, so a failed
/// fetch leaves no file behind and the subsequent load reports the missing potential.
/// Returns whether a file was written.
#[cfg(feature = "remote-data")]
pub fn download_remote_file(url: &str, path: &Path, overwrite: bool) -> bool {
    if path.is_file() && !overwrite {
        log::debug!("{} already exists, skipping download", path.display());
        return false;
    }
    log::info!("Downloading {url} to {}", path.display());
    match fetch(url, path) {
        Ok(written) => written,
        Err(e) => {
            log::warn!("Failed to download {url}: {e:#}");
            false
        }
    }
}

#[cfg(feature = "remote-data")]
#[tokio::main(flavor = "current_thread")]
async fn fetch(url: &str, path: &Path) -> Result<bool> {
    // Get response from url
    let response = reqwest::get(url).await?;
    if response.status() != reqwest::StatusCode::OK {
        log::warn!("{url} responded with {}", response.status());
        return Ok(false);
    }

    // Copy content to file
    let content = response.bytes().await?;
    std::fs::write(path, &content).with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

/// This function writes a complex array to disk as two `.npy` files, `{path}_real` and
/// `{path}_imag`, one per spawned thread. The handles return elapsed milliseconds.
pub fn complex_array_to_disk<T>(
    path: String,
    array: &Array2<Complex<T>>,
) -> Vec<JoinHandle<Result<u128>>>
where
    T: Real,
{
    let timer = Instant::now();

    // Atomic reference counters
    let real_host = Arc::new(array.clone());
    let imag_host = real_host.clone();

    // Construct path
    let real_path = format!("{}_real.npy", path);
    let imag_path = format!("{}_imag.npy", path);

    // Spawn a thread for each of the i/o operations
    let real_handle: JoinHandle<_> = spawn(move || {
        // Gather real values
        let real: Array2<T> = real_host.mapv(|x| x.re);
        array_to_disk(&real_path, &real)?;
        Ok(timer.elapsed().as_millis())
    });
    let imag_handle: JoinHandle<_> = spawn(move || {
        // Gather imag values
        let imag: Array2<T> = imag_host.mapv(|x| x.im);
        array_to_disk(&imag_path, &imag)?;
        Ok(timer.elapsed().as_millis())
    });

    vec![real_handle, imag_handle]
}

pub fn array_to_disk<A, D>(path: &str, array: &Array<A, D>) -> Result<()>
where
    A: WritableElement,
    D: Dimension,
{
    // Write to npy
    write_npy(path, array).with_context(|| RuntimeError::IOError {
        path: path.to_string(),
    })
}

#[test]
fn test_read_volume_f32_and_f64() {
    let dir = std::env::temp_dir().join(format!("mslice-io-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let volume_f32 = Array3::<f32>::from_shape_fn((2, 3, 4), |(k, i, j)| (k + i * j) as f32);
    let path_f32 = dir.join("volume_f32.npy");
    write_npy(&path_f32, &volume_f32).unwrap();
    let read: Array3<f64> = read_volume(&path_f32).unwrap();
    assert_eq!(read, volume_f32.mapv(|x| x as f64));

    let volume_f64 = volume_f32.mapv(|x| x as f64 * 0.5);
    let path_f64 = dir.join("volume_f64.npy");
    write_npy(&path_f64, &volume_f64).unwrap();
    let read: Array3<f32> = read_volume(&path_f64).unwrap();
    assert_eq!(read, volume_f64.mapv(|x| x as f32));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_read_volume_missing_and_wrong_rank() {
    let dir = std::env::temp_dir().join(format!("mslice-io-rank-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let missing = read_volume::<f64>(&dir.join("nope.npy"));
    assert!(matches!(missing, Err(RuntimeError::MissingPotential { .. })));

    let flat = Array2::<f32>::zeros((3, 3));
    let path = dir.join("flat.npy");
    write_npy(&path, &flat).unwrap();
    let wrong = read_volume::<f64>(&path);
    assert!(matches!(wrong, Err(RuntimeError::PotentialRead { .. })));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_complex_array_to_disk() {
    let dir = std::env::temp_dir().join(format!("mslice-io-complex-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let wave = Array2::from_shape_fn((3, 2), |(i, j)| Complex::new(i as f64, -(j as f64)));
    let base = dir.join("exit_wave").display().to_string();
    for handle in complex_array_to_disk(base.clone(), &wave) {
        handle.join().unwrap().unwrap();
    }

    let real: Array2<f64> = read_npy(format!("{base}_real.npy")).unwrap();
    let imag: Array2<f64> = read_npy(format!("{base}_imag.npy")).unwrap();
    assert_eq!(real, wave.mapv(|x| x.re));
    assert_eq!(imag, wave.mapv(|x| x.im));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_local_source_resolves_without_fetching() {
    let source = PotentialSource::Local {
        path: "data/volume.npy".to_string(),
    };
    assert_eq!(resolve_source(&source).unwrap(), PathBuf::from("data/volume.npy"));
}

#[cfg(feature = "remote-data")]
#[test]
fn test_existing_file_is_not_downloaded() {
    let dir = std::env::temp_dir().join(format!("mslice-io-cached-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("cached.npy");
    std::fs::write(&path, b"cached").unwrap();

    // The url is never contacted because the file is already present
    assert!(!download_remote_file("http://127.0.0.1:9/never", &path, false));
    assert_eq!(std::fs::read(&path).unwrap(), b"cached");

    std::fs::remove_dir_all(&dir).unwrap();
}
