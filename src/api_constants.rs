pub const HEALTH_ROUTE: &str = "/api/health";
pub const PIPELINE_BUILD_ROUTE: &str = "/api/pipeline/build";
pub const HOTMAP_ROUTE: &str = "/api/hotmap";
pub const HOTMAP_WINDOW_ROUTE: &str = "/api/hotmap_window";
pub const CELL_TAXA_ROUTE: &str = "/api/cell/taxa";
pub const CELL_TAXA_WINDOW_ROUTE: &str = "/api/cell/taxa_window";
pub const RANK_NEARBY_ROUTE: &str = "/api/rank_nearby";

pub const DEFAULT_CELL_TAXA_LIMIT: i64 = 50;
pub const MAX_CELL_TAXA_LIMIT: i64 = 500;
pub const DEFAULT_RANK_LIMIT: usize = 20;
pub const MAX_RANK_LIMIT: usize = 200;
