/// 单次构建的文字记录，作为通知邮件正文
///
/// 未配置邮件时不分配缓冲区，写入只落到日志。
#[derive(Debug, Default)]
pub struct Transcript {
    buf: Option<String>,
}

impl Transcript {
    pub fn new(enabled: bool) -> Self {
        Self {
            buf: enabled.then(String::new),
        }
    }

    pub fn info(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::info!("{line}");
        self.push(line);
    }

    pub fn error(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        tracing::error!("{line}");
        self.push(line);
    }

    fn push(&mut self, line: &str) {
        if let Some(buf) = self.buf.as_mut() {
            buf.push_str(line);
            if !line.ends_with('\n') {
                buf.push('\n');
            }
        }
    }

    pub fn into_body(self) -> String {
        self.buf.unwrap_or_default()
    }
}
