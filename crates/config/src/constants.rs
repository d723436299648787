pub const TOP_LEVEL_DOMAIN: &str = "org";
pub const AUTHOR: &str = "corpus";
pub const APP_NAME: &str = "corpusctl";

pub const CLI_CONFIG_FILE_NAME: &str = "corpusctl.toml";
pub const RUN_STORE_DIR_NAME: &str = "runs";
