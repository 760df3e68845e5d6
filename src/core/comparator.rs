use crate::config::ComparisonMethod;
use async_trait::async_trait;
use md5::Md5;
use sha2::digest::Output;
use sha2::{Digest, Sha256};
use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// 流式读取的块大小（1 MiB）
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// 文件内容比较策略
///
/// 只读取文件，不修改；不假设两边长度相同。
#[async_trait]
pub trait ContentComparator: Send + Sync {
    fn method(&self) -> ComparisonMethod;

    /// 两个已存在的文件内容是否完全一致
    async fn same_content(&self, left: &Path, right: &Path) -> io::Result<bool>;
}

/// 根据配置选择比较器
pub fn comparator_for(method: ComparisonMethod) -> Arc<dyn ContentComparator> {
    match method {
        ComparisonMethod::None => Arc::new(NoneComparator),
        ComparisonMethod::Binary => Arc::new(BinaryComparator::default()),
        ComparisonMethod::Md5 => Arc::new(DigestComparator::<Md5>::new(ComparisonMethod::Md5)),
        ComparisonMethod::Sha256 => {
            Arc::new(DigestComparator::<Sha256>::new(ComparisonMethod::Sha256))
        }
    }
}

/// 不比较内容，总是认为相同，完全交给上游的元数据检查
pub struct NoneComparator;

#[async_trait]
impl ContentComparator for NoneComparator {
    fn method(&self) -> ComparisonMethod {
        ComparisonMethod::None
    }

    async fn same_content(&self, _left: &Path, _right: &Path) -> io::Result<bool> {
        Ok(true)
    }
}

/// 逐块比较字节
pub struct BinaryComparator {
    chunk_size: usize,
}

impl BinaryComparator {
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }
}

impl Default for BinaryComparator {
    fn default() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }
}

#[async_trait]
impl ContentComparator for BinaryComparator {
    fn method(&self) -> ComparisonMethod {
        ComparisonMethod::Binary
    }

    async fn same_content(&self, left: &Path, right: &Path) -> io::Result<bool> {
        let mut left = File::open(left).await?;
        let mut right = File::open(right).await?;

        let mut left_buf = vec![0u8; self.chunk_size];
        let mut right_buf = vec![0u8; self.chunk_size];

        loop {
            let (left_len, right_len) = tokio::try_join!(
                read_chunk(&mut left, &mut left_buf),
                read_chunk(&mut right, &mut right_buf)
            )?;

            if left_len != right_len {
                return Ok(false);
            }
            // 两边同时到达末尾
            if left_len == 0 {
                return Ok(true);
            }
            if left_buf[..left_len] != right_buf[..right_len] {
                return Ok(false);
            }
        }
    }
}

/// 读满一个块，除非先到达文件末尾；返回实际读取的字节数
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// 分别计算两边摘要后比较（MD5 / SHA-256），每次都重新计算
pub struct DigestComparator<D> {
    method: ComparisonMethod,
    _digest: PhantomData<fn() -> D>,
}

impl<D> DigestComparator<D> {
    pub fn new(method: ComparisonMethod) -> Self {
        Self {
            method,
            _digest: PhantomData,
        }
    }
}

#[async_trait]
impl<D> ContentComparator for DigestComparator<D>
where
    D: Digest + Send + 'static,
{
    fn method(&self) -> ComparisonMethod {
        self.method
    }

    async fn same_content(&self, left: &Path, right: &Path) -> io::Result<bool> {
        let left = digest_file::<D>(left).await?;
        let right = digest_file::<D>(right).await?;
        Ok(left == right)
    }
}

async fn digest_file<D: Digest + Send>(path: &Path) -> io::Result<Output<D>> {
    let mut file = File::open(path).await?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const ALL_METHODS: [ComparisonMethod; 4] = [
        ComparisonMethod::None,
        ComparisonMethod::Binary,
        ComparisonMethod::Md5,
        ComparisonMethod::Sha256,
    ];

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn write(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn test_exact_copies_are_equal() {
        let dir = tempfile::tempdir().unwrap();

        for len in [0, CHUNK_SIZE - 1, CHUNK_SIZE, CHUNK_SIZE + 1] {
            let data = pattern(len);
            let a = write(dir.path(), "a.bin", &data);
            let b = write(dir.path(), "b.bin", &data);

            for method in ALL_METHODS {
                let comparator = comparator_for(method);
                assert_eq!(comparator.method(), method);
                assert!(
                    comparator.same_content(&a, &b).await.unwrap(),
                    "{} should report equal for {} bytes",
                    method,
                    len
                );
            }
        }
    }

    #[tokio::test]
    async fn test_one_byte_difference_detected() {
        let dir = tempfile::tempdir().unwrap();

        for len in [1, CHUNK_SIZE, CHUNK_SIZE + 1] {
            let data = pattern(len);
            let mut changed = data.clone();
            let last = changed.len() - 1;
            changed[last] ^= 0xff;

            let a = write(dir.path(), "a.bin", &data);
            let b = write(dir.path(), "b.bin", &changed);

            for method in [ComparisonMethod::Binary, ComparisonMethod::Md5, ComparisonMethod::Sha256] {
                assert!(
                    !comparator_for(method).same_content(&a, &b).await.unwrap(),
                    "{} should detect difference at {} bytes",
                    method,
                    len
                );
            }
        }
    }

    #[tokio::test]
    async fn test_different_lengths_with_common_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.txt", b"hello");
        let b = write(dir.path(), "b.txt", b"hello world");

        for method in [ComparisonMethod::Binary, ComparisonMethod::Md5, ComparisonMethod::Sha256] {
            assert!(!comparator_for(method).same_content(&a, &b).await.unwrap());
            assert!(!comparator_for(method).same_content(&b, &a).await.unwrap());
        }
        assert!(NoneComparator.same_content(&a, &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_small_chunks_cross_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let comparator = BinaryComparator::with_chunk_size(4);

        let a = write(dir.path(), "a", b"abcdefgh");
        let b = write(dir.path(), "b", b"abcdefgh");
        let c = write(dir.path(), "c", b"abcdefgi");
        let d = write(dir.path(), "d", b"abcdefghi");

        assert!(comparator.same_content(&a, &b).await.unwrap());
        assert!(!comparator.same_content(&a, &c).await.unwrap());
        assert!(!comparator.same_content(&a, &d).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a", b"x");
        let missing = dir.path().join("missing");

        let err = BinaryComparator::default()
            .same_content(&a, &missing)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
