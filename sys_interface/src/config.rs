//! ABI-visible limits.

/// 用户栈大小 (bytes), 附加在可执行文件镜像之后
pub const USER_STACK_SIZE: usize = 1024;

/// Per-thread open-file table size, console descriptors included.
pub const MAX_OPEN_FILES: usize = 20;

/// Console file descriptors. They bypass the file system.
pub const CONSOLE_INPUT: usize = 0;
pub const CONSOLE_OUTPUT: usize = 1;

/// `nice` takes values in `[NICE_MIN, NICE_MAX)`.
pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 20;

/// Longest file-name component stored in a directory entry.
pub const FILE_NAME_MAX_LEN: usize = 9;
