//! SQLite repositories for comics, chapters and images
//!
//! Every operation borrows a connection instead of owning the pool, so the
//! same code runs on a pooled connection, inside a transaction, or inside a
//! savepoint opened on a caller's transaction.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use crate::domain::{Chapter, Comic, CrawlStatus, Image, ImageKind, NewChapter, NewComic, NewImage};

type DbResult<T> = Result<T, sqlx::Error>;

const COMIC_COLUMNS: &str = "id, origin_id, origin_url, title, description, status, chapter_count, crawl_status, thumb_image_id, created_at, updated_at";
const CHAPTER_COLUMNS: &str = "id, comic_id, chapter_number, title, source_url, position, crawl_status, created_at, updated_at";
const IMAGE_COLUMNS: &str = "id, file_name, origin_urls, position, kind, comic_id, chapter_id, created_at";

/// SQL expression ranking a `crawl_status` column so updates can refuse to move backwards.
const STATUS_RANK_SQL: &str =
    "CASE crawl_status WHEN 'READY_FOR_CRAWL' THEN 0 WHEN 'ON_CRAWL' THEN 1 ELSE 2 END";

fn status_rank(status: CrawlStatus) -> i64 {
    match status {
        CrawlStatus::ReadyForCrawl => 0,
        CrawlStatus::OnCrawl => 1,
        CrawlStatus::Done => 2,
    }
}

fn decode_err(column: &str, reason: impl ToString) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: reason.to_string().into(),
    }
}

fn row_to_comic(row: &SqliteRow) -> DbResult<Comic> {
    let crawl_status: String = row.try_get("crawl_status")?;
    Ok(Comic {
        id: row.try_get("id")?,
        origin_id: row.try_get("origin_id")?,
        origin_url: row.try_get("origin_url")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        status: row.try_get("status")?,
        chapter_count: row.try_get("chapter_count")?,
        crawl_status: crawl_status
            .parse()
            .map_err(|e| decode_err("crawl_status", e))?,
        thumb_image_id: row.try_get("thumb_image_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_chapter(row: &SqliteRow) -> DbResult<Chapter> {
    let crawl_status: String = row.try_get("crawl_status")?;
    Ok(Chapter {
        id: row.try_get("id")?,
        comic_id: row.try_get("comic_id")?,
        chapter_number: row.try_get("chapter_number")?,
        title: row.try_get("title")?,
        source_url: row.try_get("source_url")?,
        position: row.try_get("position")?,
        crawl_status: crawl_status
            .parse()
            .map_err(|e| decode_err("crawl_status", e))?,
        images: Vec::new(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_image(row: &SqliteRow) -> DbResult<Image> {
    let origin_urls: String = row.try_get("origin_urls")?;
    let kind: String = row.try_get("kind")?;
    Ok(Image {
        id: row.try_get("id")?,
        file_name: row.try_get("file_name")?,
        origin_urls: serde_json::from_str(&origin_urls).map_err(|e| decode_err("origin_urls", e))?,
        position: row.try_get("position")?,
        kind: kind.parse::<ImageKind>().map_err(|e| decode_err("kind", e))?,
        comic_id: row.try_get("comic_id")?,
        chapter_id: row.try_get("chapter_id")?,
        created_at: row.try_get("created_at")?,
    })
}

pub struct ComicRepository;

impl ComicRepository {
    pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Comic>> {
        let row = sqlx::query(&format!("SELECT {COMIC_COLUMNS} FROM comics WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_comic).transpose()
    }

    pub async fn find_by_origin_url(
        conn: &mut SqliteConnection,
        origin_url: &str,
    ) -> DbResult<Option<Comic>> {
        let row = sqlx::query(&format!(
            "SELECT {COMIC_COLUMNS} FROM comics WHERE origin_url = ? ORDER BY id LIMIT 1"
        ))
        .bind(origin_url)
        .fetch_optional(&mut *conn)
        .await?;
        row.as_ref().map(row_to_comic).transpose()
    }

    pub async fn find_by_origin_id(
        conn: &mut SqliteConnection,
        origin_id: &str,
    ) -> DbResult<Option<Comic>> {
        let row = sqlx::query(&format!("SELECT {COMIC_COLUMNS} FROM comics WHERE origin_id = ?"))
            .bind(origin_id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_comic).transpose()
    }

    /// Insert a comic in `READY_FOR_CRAWL` without a thumbnail.
    pub async fn insert(conn: &mut SqliteConnection, comic: &NewComic) -> DbResult<Comic> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO comics
            (origin_id, origin_url, title, description, status, chapter_count, crawl_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&comic.origin_id)
        .bind(&comic.origin_url)
        .bind(&comic.title)
        .bind(&comic.description)
        .bind(&comic.status)
        .bind(comic.chapter_count)
        .bind(CrawlStatus::ReadyForCrawl.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(Comic {
            id: result.last_insert_rowid(),
            origin_id: comic.origin_id.clone(),
            origin_url: comic.origin_url.clone(),
            title: comic.title.clone(),
            description: comic.description.clone(),
            status: comic.status.clone(),
            chapter_count: comic.chapter_count,
            crawl_status: CrawlStatus::ReadyForCrawl,
            thumb_image_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn set_thumbnail(
        conn: &mut SqliteConnection,
        comic_id: i64,
        image_id: i64,
    ) -> DbResult<()> {
        sqlx::query("UPDATE comics SET thumb_image_id = ?, updated_at = ? WHERE id = ?")
            .bind(image_id)
            .bind(Utc::now())
            .bind(comic_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Move the comic to `status` unless that would go backwards.
    /// Returns whether a row changed.
    pub async fn advance_crawl_status(
        conn: &mut SqliteConnection,
        comic_id: i64,
        status: CrawlStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE comics SET crawl_status = ?, updated_at = ? WHERE id = ? AND {STATUS_RANK_SQL} <= ?"
        ))
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(comic_id)
        .bind(status_rank(status))
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct ChapterRepository;

impl ChapterRepository {
    pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Chapter>> {
        let row = sqlx::query(&format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_chapter).transpose()
    }

    /// All chapters of a comic in reading order. Images are not loaded.
    pub async fn find_by_comic(conn: &mut SqliteConnection, comic_id: i64) -> DbResult<Vec<Chapter>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE comic_id = ? ORDER BY position ASC, id ASC"
        ))
        .bind(comic_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_chapter).collect()
    }

    pub async fn find_ready_for_crawl(
        conn: &mut SqliteConnection,
        comic_id: i64,
    ) -> DbResult<Vec<Chapter>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE comic_id = ? AND crawl_status = ? ORDER BY position ASC, id ASC"
        ))
        .bind(comic_id)
        .bind(CrawlStatus::ReadyForCrawl.as_str())
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_chapter).collect()
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        chapter: &NewChapter,
        status: CrawlStatus,
    ) -> DbResult<Chapter> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO chapters
            (comic_id, chapter_number, title, source_url, position, crawl_status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(chapter.comic_id)
        .bind(&chapter.chapter_number)
        .bind(&chapter.title)
        .bind(&chapter.source_url)
        .bind(chapter.position)
        .bind(status.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(Chapter {
            id: result.last_insert_rowid(),
            comic_id: chapter.comic_id,
            chapter_number: chapter.chapter_number.clone(),
            title: chapter.title.clone(),
            source_url: chapter.source_url.clone(),
            position: chapter.position,
            crawl_status: status,
            images: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Bulk insert chapter stubs in `READY_FOR_CRAWL`. Returns the number of rows written.
    pub async fn insert_stubs(conn: &mut SqliteConnection, chapters: &[NewChapter]) -> DbResult<u64> {
        if chapters.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut written = 0;
        // SQLite caps bound parameters per statement; 8 columns * 100 rows stays well under it.
        for batch in chapters.chunks(100) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO chapters (comic_id, chapter_number, title, source_url, position, crawl_status, created_at, updated_at) ",
            );
            builder.push_values(batch, |mut row, chapter| {
                row.push_bind(chapter.comic_id)
                    .push_bind(&chapter.chapter_number)
                    .push_bind(&chapter.title)
                    .push_bind(&chapter.source_url)
                    .push_bind(chapter.position)
                    .push_bind(CrawlStatus::ReadyForCrawl.as_str())
                    .push_bind(now)
                    .push_bind(now);
            });
            written += builder.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(written)
    }

    /// Move the chapter to `status` unless that would go backwards.
    pub async fn advance_crawl_status(
        conn: &mut SqliteConnection,
        chapter_id: i64,
        status: CrawlStatus,
    ) -> DbResult<bool> {
        let result = sqlx::query(&format!(
            "UPDATE chapters SET crawl_status = ?, updated_at = ? WHERE id = ? AND {STATUS_RANK_SQL} <= ?"
        ))
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(chapter_id)
        .bind(status_rank(status))
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `READY_FOR_CRAWL -> ON_CRAWL`, only if the chapter is still ready.
    /// Returns `false` when another run already took it.
    pub async fn claim_for_crawl(conn: &mut SqliteConnection, chapter_id: i64) -> DbResult<bool> {
        let result = sqlx::query("UPDATE chapters SET crawl_status = ?, updated_at = ? WHERE id = ? AND crawl_status = ?")
            .bind(CrawlStatus::OnCrawl.as_str())
            .bind(Utc::now())
            .bind(chapter_id)
            .bind(CrawlStatus::ReadyForCrawl.as_str())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn has_images(conn: &mut SqliteConnection, chapter_id: i64) -> DbResult<bool> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM images WHERE chapter_id = ?) AS present")
            .bind(chapter_id)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row.try_get::<i64, _>("present")? != 0)
    }

    /// Chapters of a comic that are not `DONE` yet.
    pub async fn count_unfinished(conn: &mut SqliteConnection, comic_id: i64) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS unfinished FROM chapters WHERE comic_id = ? AND crawl_status <> ?")
            .bind(comic_id)
            .bind(CrawlStatus::Done.as_str())
            .fetch_one(&mut *conn)
            .await?;
        row.try_get("unfinished")
    }
}

pub struct ImageRepository;

impl ImageRepository {
    pub async fn insert(conn: &mut SqliteConnection, image: &NewImage) -> DbResult<Image> {
        let now: DateTime<Utc> = Utc::now();
        let origin_urls =
            serde_json::to_string(&image.origin_urls).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        let kind = image.owner.kind();

        let result = sqlx::query(
            r#"
            INSERT INTO images (file_name, origin_urls, position, kind, comic_id, chapter_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&image.file_name)
        .bind(&origin_urls)
        .bind(image.position)
        .bind(kind.as_str())
        .bind(image.owner.comic_id())
        .bind(image.owner.chapter_id())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(Image {
            id: result.last_insert_rowid(),
            file_name: image.file_name.clone(),
            origin_urls: image.origin_urls.clone(),
            position: image.position,
            kind,
            comic_id: image.owner.comic_id(),
            chapter_id: image.owner.chapter_id(),
            created_at: now,
        })
    }

    pub async fn insert_many(conn: &mut SqliteConnection, images: &[NewImage]) -> DbResult<Vec<Image>> {
        let mut saved = Vec::with_capacity(images.len());
        for image in images {
            saved.push(Self::insert(&mut *conn, image).await?);
        }
        Ok(saved)
    }

    pub async fn find_by_id(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Image>> {
        let row = sqlx::query(&format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?"))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_image).transpose()
    }

    /// Pages of a chapter in reading order.
    pub async fn find_by_chapter(conn: &mut SqliteConnection, chapter_id: i64) -> DbResult<Vec<Image>> {
        let rows = sqlx::query(&format!(
            "SELECT {IMAGE_COLUMNS} FROM images WHERE chapter_id = ? ORDER BY position ASC, id ASC"
        ))
        .bind(chapter_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_image).collect()
    }
}
