//! Server-side Lua scripts.
//!
//! Both scripts are evaluated by SHA through [`redis::Script`], which loads
//! the full body transparently on a `NOSCRIPT` miss, so script-cache flushes
//! and failovers need no handling in the client.

/// Atomic admission: stock check, duplicate-buyer check, decrement and
/// record, as a single step.
///
/// `KEYS[1]` = stock counter, `KEYS[2]` = purchased set, `ARGV[1]` = buyer.
/// Returns `{1, 'OK'}` on admission or `{0, reason}` on refusal.
///
/// The purchased set inherits the stock counter's TTL the first time a buyer
/// is added, so both keys expire together after the sale.
pub const ADMISSION: &str = r"
local stock = redis.call('GET', KEYS[1])
if not stock then
  return {0, 'STOCK_NOT_FOUND'}
end
if tonumber(stock) <= 0 then
  return {0, 'OUT_OF_STOCK'}
end
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
  return {0, 'USER_ALREADY_PURCHASED'}
end
redis.call('DECR', KEYS[1])
redis.call('SADD', KEYS[2], ARGV[1])
local stock_ttl = redis.call('TTL', KEYS[1])
if stock_ttl > 0 and redis.call('TTL', KEYS[2]) < 0 then
  redis.call('EXPIRE', KEYS[2], stock_ttl)
end
return {1, 'OK'}
";

/// Fulfillment-time membership re-check. Mutates nothing, so a worker crash
/// between finalize and commit leaves the admission record intact for the
/// redelivered attempt.
///
/// `KEYS[1]` = purchased set, `ARGV[1]` = buyer. Returns 1 when the buyer
/// holds an admission record.
pub const FINALIZE: &str = r"
return redis.call('SISMEMBER', KEYS[1], ARGV[1])
";
