//! Trade method names understood by the gateway bridge.

pub const OPEN_TRADE_CONTEXT: &str = "open_trade_context";
pub const SET_TRADE_ENV: &str = "set_trade_env";
pub const GET_ACC_LIST: &str = "get_acc_list";
pub const ACCINFO_QUERY: &str = "accinfo_query";
pub const POSITION_LIST_QUERY: &str = "position_list_query";
pub const GET_MAX_POWER: &str = "get_max_power";
pub const GET_MARGIN_RATIO: &str = "get_margin_ratio";
