use log::{debug, info};

/// Loads variables from a `.env` file in the working directory (or a parent),
/// leaving already-set variables untouched. A missing file is not an error.
pub fn load_env() {
    match dotenv::dotenv() {
        Ok(path) => info!("Loaded environment from {}", path.display()),
        Err(e) => debug!("No .env file loaded ({}); using process environment", e),
    }
}
