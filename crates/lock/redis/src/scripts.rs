//! Lua scripts for atomic lock operations.
//!
//! Compare scripts return `1` when the token matched and the write happened,
//! `0` when the key is absent, and `-1` when another token holds the key.

/// KEYS[1] = lock key, ARGV[1] = token, ARGV[2] = ttl in milliseconds.
pub const LOCK_ACQUIRE: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
    return 1
end
return 0
";

/// KEYS[1] = lock key, ARGV[1] = token.
pub const LOCK_RELEASE: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
if current == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return -1
";

/// KEYS[1] = lock key, ARGV[1] = token, ARGV[2] = ttl in milliseconds.
pub const LOCK_EXTEND: &str = r"
local current = redis.call('GET', KEYS[1])
if not current then
    return 0
end
if current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return -1
";
