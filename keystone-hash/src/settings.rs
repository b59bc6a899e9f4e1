// Copyright (c) 2022 MASSA LABS <info@massa.net>

/// Size of a serialized hash, in bytes
pub const HASH_SIZE_BYTES: usize = 32;
