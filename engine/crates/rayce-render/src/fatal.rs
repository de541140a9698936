//! 顶层的致命错误处理
//!
//! GPU 资源创建失败之后没有安全的继续方式，应用层统一在这里记录日志并退出。

/// 成功时返回值，失败时记录失败的操作与原因，然后以状态码 1 退出进程
pub fn exit_on_error<T, E>(operation: &str, result: Result<T, E>) -> T
where
    E: Into<anyhow::Error>,
{
    match result {
        Ok(value) => value,
        Err(e) => {
            log::error!("{}", describe_failure(operation, &e.into()));
            std::process::exit(1);
        }
    }
}

/// 失败信息，包含完整的错误链
pub fn describe_failure(operation: &str, error: &anyhow::Error) -> String {
    format!("fatal: {operation} failed: {error:#}")
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use rayce_gfx::GpuError;

    use super::*;

    #[test]
    fn test_ok_passes_through() {
        let value = exit_on_error("noop", Ok::<_, GpuError>(42));
        assert_eq!(value, 42);
    }

    #[test]
    fn test_failure_message_names_operation_and_chain() {
        let err = Err::<(), _>(GpuError::DescriptorCapacityExceeded {
            binding: 1,
            requested: 5,
            capacity: 4,
        })
        .context("update model data")
        .unwrap_err();
        let msg = describe_failure("frame 3", &err);
        assert_eq!(
            msg,
            "fatal: frame 3 failed: update model data: descriptor binding 1 requested 5 descriptors, capacity is 4"
        );
    }
}
