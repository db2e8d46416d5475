/// Lua script for acquiring a lock key (SET NX PX).
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
/// ARGV\[2\] = TTL in milliseconds
///
/// Returns 1 if acquired, 0 otherwise.
pub const ACQUIRE: &str = r"
local ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
if ok then
    return 1
end
return 0
";

/// Lua script for releasing a lock key.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
///
/// Returns 1 if released, 0 if not held by this token.
pub const RELEASE: &str = r"
local token = redis.call('GET', KEYS[1])
if token == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
";

/// Lua script for extending a lock key's TTL.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
/// ARGV\[2\] = new TTL in milliseconds
///
/// Returns 1 if extended, 0 if not held by this token.
pub const EXTEND: &str = r"
local token = redis.call('GET', KEYS[1])
if token == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
";

/// Lua script for reading the remaining TTL of a held lock key.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
///
/// Returns the remaining TTL in milliseconds if the key is held by this
/// token, 0 otherwise.
pub const HELD_TTL: &str = r"
local token = redis.call('GET', KEYS[1])
if token == ARGV[1] then
    local pttl = redis.call('PTTL', KEYS[1])
    if pttl > 0 then
        return pttl
    end
end
return 0
";

/// Lua script for raising a counter to a target value.
///
/// KEYS\[1\] = counter key
/// ARGV\[1\] = target value
///
/// Sets the counter to the target only if its current value is lower
/// (absent counts as lower). Never lowers the counter. Returns the counter
/// value after the call.
pub const RAISE_TO: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]))
local target = tonumber(ARGV[1])
if current == nil or current < target then
    redis.call('SET', KEYS[1], target)
    return target
end
return current
";
