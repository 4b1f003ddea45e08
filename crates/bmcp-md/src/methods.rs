//! Quote method names understood by the gateway bridge.

pub const GET_GLOBAL_STATE: &str = "get_global_state";
pub const GET_STOCK_QUOTE: &str = "get_stock_quote";
pub const GET_MARKET_SNAPSHOT: &str = "get_market_snapshot";
pub const GET_CUR_KLINE: &str = "get_cur_kline";
pub const REQUEST_HISTORY_KLINE: &str = "request_history_kline";
pub const GET_RT_DATA: &str = "get_rt_data";
pub const GET_TICKER: &str = "get_rt_ticker";
pub const GET_ORDER_BOOK: &str = "get_order_book";
pub const GET_BROKER_QUEUE: &str = "get_broker_queue";
pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const GET_MARKET_STATE: &str = "get_market_state";
pub const GET_SECURITY_INFO: &str = "get_stock_basicinfo";
pub const GET_SECURITY_LIST: &str = "get_security_list";
pub const GET_OPTION_CHAIN: &str = "get_option_chain";
pub const GET_OPTION_EXPIRATION_DATE: &str = "get_option_expiration_date";
pub const GET_OPTION_CONDOR: &str = "get_option_condor";
pub const GET_OPTION_BUTTERFLY: &str = "get_option_butterfly";
